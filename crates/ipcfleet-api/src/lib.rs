// ipcfleet-api: Async client for Dahua-family IP camera protocols (RPC + CGI)

pub mod cgi;
pub mod error;
pub mod rpc;
pub mod transport;

pub use cgi::{CgiClient, CgiGet, CgiRequest, Event, EventManager, EventReader};
pub use error::Error;
pub use rpc::{
    ClientConfig, ConnectionSnapshot, LoginFailure, RequestBuilder, Response, ResponseError,
    RpcClient, RpcGen, State,
};
pub use transport::TransportConfig;
