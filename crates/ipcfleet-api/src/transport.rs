// Shared transport configuration for building reqwest::Client instances.
//
// The RPC and CGI clients of one device share a single HTTP client so
// connection pooling and timeouts stay consistent per fleet.

use std::time::Duration;

use crate::error::Error;

const DEFAULT_USER_AGENT: &str = concat!("ipcfleet/", env!("CARGO_PKG_VERSION"));

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Whole-request timeout for RPC and one-shot CGI calls.
    pub timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            user_agent: DEFAULT_USER_AGENT.into(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` for request/response calls.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(&self.user_agent)
            .build()
            .map_err(Error::Transport)
    }

    /// Build a `reqwest::Client` without a whole-request timeout.
    ///
    /// Used for long-lived multipart streams (event feed, audio) where only
    /// the connect phase is bounded.
    pub fn build_streaming_client(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(&self.user_agent)
            .build()
            .map_err(Error::Transport)
    }
}
