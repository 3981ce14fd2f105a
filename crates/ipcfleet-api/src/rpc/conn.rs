// Per-device connection state machine
//
// `Connection` is plain data with explicit transitions. `RpcClient` owns one
// behind an async mutex so every readiness check (login, keepalive,
// re-login) for a device is single-flight.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::COOKIE;
use secrecy::SecretString;
use serde::Serialize;
use strum::Display;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::cgi::ok;
use crate::error::Error;
use crate::rpc::RpcGen;
use crate::rpc::auth::{self, LoginFailure};
use crate::rpc::envelope::{RequestBuilder, ResponseError};
use crate::rpc::{global, wire};

// ── State ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum State {
    LoggedOut,
    LoggedIn,
    /// Login was rejected for a credential or account reason. Sticky until
    /// [`RpcClient::reset`].
    Error,
}

#[derive(Debug, Clone)]
struct Rejection {
    reason: LoginFailure,
    source: ResponseError,
}

/// Session identity and request sequencing for one device.
#[derive(Debug, Clone)]
pub struct Connection {
    state: State,
    last_id: u64,
    session: String,
    last_login: Option<Instant>,
    logged_in_at: Option<DateTime<Utc>>,
    error: Option<Rejection>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Self {
            state: State::LoggedOut,
            last_id: 0,
            session: String::new(),
            last_login: None,
            logged_in_at: None,
            error: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// Allocate the next request id. Ids are strictly increasing until the
    /// next transition out of `LoggedIn`.
    pub fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    pub(crate) fn set_session(&mut self, session: String) {
        self.session = session;
    }

    /// `true` when the last login is at least `threshold` old.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.last_login
            .is_none_or(|at| at.elapsed() >= threshold)
    }

    /// The stored login rejection, when in `Error`.
    pub fn error(&self) -> Option<Error> {
        self.error.as_ref().map(|r| Error::Login {
            reason: r.reason,
            source: r.source.clone(),
        })
    }

    // ── Transitions ─────────────────────────────────────────────────

    pub fn set_logged_in(&mut self) {
        self.state = State::LoggedIn;
        self.last_login = Some(Instant::now());
        self.logged_in_at = Some(Utc::now());
        self.error = None;
    }

    pub fn set_logged_out(&mut self) {
        *self = Self::new();
    }

    pub fn set_error(&mut self, reason: LoginFailure, source: ResponseError) {
        *self = Self {
            state: State::Error,
            error: Some(Rejection { reason, source }),
            ..Self::new()
        };
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            session: self.session.clone(),
            last_login: self.logged_in_at,
            error: self.error().map(|e| e.to_string()),
        }
    }
}

/// Point-in-time view of a [`Connection`] for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub state: State,
    pub session: String,
    pub last_login: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

// ── RpcEndpoint ─────────────────────────────────────────────────────

/// HTTP client plus the two RPC URLs of one device.
#[derive(Debug, Clone)]
pub struct RpcEndpoint {
    http: reqwest::Client,
    base_url: Url,
    rpc_url: Url,
    login_url: Url,
}

impl RpcEndpoint {
    /// `base_url` is the device root, e.g. `http://192.168.1.108`.
    pub fn new(http: reqwest::Client, base_url: &Url) -> Result<Self, Error> {
        Ok(Self {
            http,
            rpc_url: base_url.join("/RPC2")?,
            login_url: base_url.join("/RPC2_Login")?,
            base_url: base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn rpc_url(&self) -> &Url {
        &self.rpc_url
    }

    /// Builder for `/RPC2_Login`, stamped with the next id and current session.
    pub fn login_rpc(&self, conn: &mut Connection) -> RequestBuilder {
        let id = conn.next_id();
        RequestBuilder::new(self.http.clone(), self.login_url.clone(), id, conn.session())
    }

    /// Builder for `/RPC2`. Requires a session.
    pub fn rpc(&self, conn: &mut Connection) -> Result<RequestBuilder, Error> {
        if conn.session().is_empty() {
            return Err(Error::ProtocolViolation("connection has no session".into()));
        }
        let id = conn.next_id();
        Ok(RequestBuilder::new(
            self.http.clone(),
            self.rpc_url.clone(),
            id,
            conn.session(),
        ))
    }
}

// ── RpcClient ───────────────────────────────────────────────────────

/// Tunables for [`RpcClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Session age after which a keepalive is sent before the next call.
    pub keepalive_after: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            keepalive_after: Duration::from_secs(60),
        }
    }
}

/// Authenticated RPC client for one device.
pub struct RpcClient {
    endpoint: RpcEndpoint,
    username: String,
    password: SecretString,
    config: ClientConfig,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("url", self.endpoint.base_url())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &Url,
        username: impl Into<String>,
        password: SecretString,
        config: ClientConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            endpoint: RpcEndpoint::new(http, base_url)?,
            username: username.into(),
            password,
            config,
            conn: Mutex::new(Connection::new()),
        })
    }

    pub fn endpoint(&self) -> &RpcEndpoint {
        &self.endpoint
    }

    pub async fn state(&self) -> ConnectionSnapshot {
        self.conn.lock().await.snapshot()
    }

    /// Ensure the connection is ready and return its session token.
    pub async fn session(&self) -> Result<String, Error> {
        let mut conn = self.conn.lock().await;
        self.ready(&mut conn).await?;
        Ok(conn.session().to_owned())
    }

    /// GET a file from the device's local disk through `RPC_Loadfile`.
    ///
    /// `file_path` is an absolute device path as returned by the file
    /// finder. The request is authenticated with the current session.
    pub async fn load_file(&self, file_path: &str) -> Result<reqwest::Response, Error> {
        let session = self.session().await?;
        let url = wire::load_file_url(self.endpoint.base_url(), file_path)?;
        debug!(%url, "loading file");
        let resp = self
            .endpoint
            .http
            .get(url)
            .header(COOKIE, wire::session_cookie(&session))
            .send()
            .await?;
        ok(resp)
    }

    /// Best-effort `global.logout`, then force `LoggedOut`. Never fails.
    pub async fn logout(&self) {
        let mut conn = self.conn.lock().await;
        if conn.state() == State::LoggedIn {
            match self.endpoint.rpc(&mut conn) {
                Ok(rb) => {
                    if let Err(e) = global::logout(rb).await {
                        debug!(url = %self.endpoint.base_url(), error = %e, "logout failed (non-fatal)");
                    }
                }
                Err(e) => debug!(error = %e, "skipping logout call"),
            }
        }
        conn.set_logged_out();
        info!(url = %self.endpoint.base_url(), "logged out");
    }

    /// Clear a sticky `Error` state so the next call logs in again.
    pub async fn reset(&self) {
        self.conn.lock().await.set_logged_out();
    }

    async fn ready(&self, conn: &mut Connection) -> Result<(), Error> {
        loop {
            match conn.state() {
                State::LoggedOut => {
                    // Clears anything a cancelled handshake left behind.
                    conn.set_logged_out();
                    return auth::login(&self.endpoint, conn, &self.username, &self.password)
                        .await;
                }
                State::LoggedIn => {
                    if !conn.is_stale(self.config.keepalive_after) {
                        return Ok(());
                    }
                    match global::keep_alive(self.endpoint.rpc(conn)?).await {
                        Ok(timeout) => {
                            debug!(url = %self.endpoint.base_url(), timeout, "keepalive ok");
                            conn.set_logged_in();
                            return Ok(());
                        }
                        Err(e) if e.is_session_invalid() => {
                            warn!(url = %self.endpoint.base_url(), "session invalidated, logging in again");
                            conn.set_logged_out();
                        }
                        Err(e) => return Err(e),
                    }
                }
                State::Error => {
                    return Err(conn.error().unwrap_or_else(|| {
                        Error::ProtocolViolation("connection in error state".into())
                    }));
                }
            }
        }
    }
}

impl RpcGen for RpcClient {
    async fn rpc(&self) -> Result<RequestBuilder, Error> {
        let mut conn = self.conn.lock().await;
        self.ready(&mut conn).await?;
        self.endpoint.rpc(&mut conn)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn starts_logged_out() {
        let conn = Connection::new();
        assert_eq!(conn.state(), State::LoggedOut);
        assert_eq!(conn.session(), "");
        assert!(conn.error().is_none());
        assert!(conn.is_stale(Duration::from_secs(60)));
    }

    #[test]
    fn ids_increase_and_reset_on_logout() {
        let mut conn = Connection::new();
        conn.set_session("abc".into());
        assert_eq!(conn.next_id(), 1);
        assert_eq!(conn.next_id(), 2);
        conn.set_logged_in();
        assert_eq!(conn.next_id(), 3);

        conn.set_logged_out();
        assert_eq!(conn.session(), "");
        assert_eq!(conn.next_id(), 1);
    }

    #[test]
    fn login_refreshes_timestamp() {
        let mut conn = Connection::new();
        conn.set_logged_in();
        assert_eq!(conn.state(), State::LoggedIn);
        assert!(!conn.is_stale(Duration::from_secs(60)));
        assert!(conn.is_stale(Duration::ZERO));
        assert!(conn.snapshot().last_login.is_some());
    }

    #[test]
    fn error_state_stores_rejection_and_resets_session() {
        let mut conn = Connection::new();
        conn.set_session("abc".into());
        conn.next_id();

        let source = ResponseError::new("global.login", 268_632_081, "");
        conn.set_error(LoginFailure::HasBeenLocked, source);

        assert_eq!(conn.state(), State::Error);
        assert_eq!(conn.session(), "");
        assert_eq!(conn.next_id(), 1);
        assert_eq!(
            conn.error().and_then(|e| e.login_failure()),
            Some(LoginFailure::HasBeenLocked)
        );

        conn.set_logged_out();
        assert!(conn.error().is_none());
    }

    #[test]
    fn endpoint_urls() {
        let base = Url::parse("http://192.168.1.108:8080").unwrap();
        let endpoint = RpcEndpoint::new(reqwest::Client::new(), &base).unwrap();
        assert_eq!(endpoint.rpc_url().as_str(), "http://192.168.1.108:8080/RPC2");

        let mut conn = Connection::new();
        assert!(endpoint.rpc(&mut conn).is_err());
        let login = endpoint.login_rpc(&mut conn);
        assert_eq!(login.url().as_str(), "http://192.168.1.108:8080/RPC2_Login");
        assert_eq!(login.request().id, 1);
    }
}
