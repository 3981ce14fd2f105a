// JSON-RPC-like protocol spoken on `/RPC2` and `/RPC2_Login`.
//
// Endpoint modules (`global`, `magic_box`, `media_file_find`) are free
// functions over the `RpcGen` capability so they work against any source of
// authenticated request builders, not only `RpcClient`.

pub mod auth;
pub mod conn;
pub mod envelope;
pub mod global;
pub mod magic_box;
pub mod media_file_find;
pub mod wire;

use std::future::Future;

pub use auth::{AuthParams, LoginFailure, classify_login_error};
pub use conn::{ClientConfig, Connection, ConnectionSnapshot, RpcClient, RpcEndpoint, State};
pub use envelope::{ErrorKind, Request, RequestBuilder, Response, ResponseError, RpcResult, Session};
pub use wire::{Integer, Timestamp};

use crate::error::Error;

/// Source of authenticated request builders.
///
/// Each call makes sure the session is usable (logging in or sending a
/// keepalive as needed) and returns a builder stamped with the next request
/// id and the current session.
pub trait RpcGen {
    fn rpc(&self) -> impl Future<Output = Result<RequestBuilder, Error>> + Send;
}
