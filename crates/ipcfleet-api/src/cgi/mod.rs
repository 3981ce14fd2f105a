// CGI HTTP client
//
// GET requests against `{scheme}://{host}/cgi-bin/{method}?{query}` with
// transparent HTTP Digest authentication. Endpoint helpers (`media`,
// `event`) are free functions over the `CgiGet` capability.

pub mod digest;
pub mod event;
pub mod media;

use std::future::Future;
use std::sync::{Mutex, PoisonError};

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;
use digest::Challenge;

pub use event::{Event, EventManager, EventReader, event_manager};
pub use media::{HttpType, MediaStream};

// ── CgiRequest ──────────────────────────────────────────────────────

/// A CGI call: script name, query pairs and extra headers.
#[derive(Debug, Clone, Default)]
pub struct CgiRequest {
    method: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    streaming: bool,
}

impl CgiRequest {
    /// `method` is the script name relative to `/cgi-bin/`, e.g. `snapshot.cgi`.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Self::default()
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn query_int(self, key: impl Into<String>, value: i64) -> Self {
        self.query(key, value.to_string())
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Long-lived response body: no whole-request timeout applies.
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Full URL under the `/cgi-bin/` base.
    pub fn url(&self, cgi_base: &Url) -> Result<Url, Error> {
        let mut url = cgi_base.join(&self.method)?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        Ok(url)
    }
}

// ── CgiGet ──────────────────────────────────────────────────────────

/// Capability to issue authenticated CGI GET requests.
pub trait CgiGet {
    fn cgi_get(
        &self,
        req: &CgiRequest,
    ) -> impl Future<Output = Result<reqwest::Response, Error>> + Send;
}

// ── CgiClient ───────────────────────────────────────────────────────

#[derive(Debug)]
struct DigestState {
    challenge: Challenge,
    nc: u32,
}

/// Digest-authenticated CGI client for one device.
pub struct CgiClient {
    http: reqwest::Client,
    streaming: reqwest::Client,
    base_url: Url,
    username: String,
    password: SecretString,
    digest: Mutex<Option<DigestState>>,
}

impl std::fmt::Debug for CgiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CgiClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl CgiClient {
    /// `device_url` is the device root, e.g. `http://192.168.1.108`.
    pub fn new(
        device_url: &Url,
        username: impl Into<String>,
        password: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            streaming: transport.build_streaming_client()?,
            base_url: device_url.join("/cgi-bin/")?,
            username: username.into(),
            password,
            digest: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Authorization header from the cached challenge, bumping the nonce count.
    fn cached_authorization(&self, url: &Url) -> Option<String> {
        let mut guard = self.digest.lock().unwrap_or_else(PoisonError::into_inner);
        let state = guard.as_mut()?;
        state.nc += 1;
        Some(self.answer(&state.challenge, state.nc, url))
    }

    fn store_challenge(&self, challenge: Challenge, url: &Url) -> String {
        let authorization = self.answer(&challenge, 1, url);
        let mut guard = self.digest.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(DigestState { challenge, nc: 1 });
        authorization
    }

    fn answer(&self, challenge: &Challenge, nc: u32, url: &Url) -> String {
        let uri = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_owned(),
        };
        let cnonce = uuid::Uuid::new_v4().simple().to_string();
        challenge.authorization(
            &self.username,
            self.password.expose_secret(),
            "GET",
            &uri,
            nc,
            &cnonce[..16],
        )
    }

    async fn send(
        &self,
        req: &CgiRequest,
        url: &Url,
        authorization: Option<String>,
    ) -> Result<reqwest::Response, Error> {
        let http = if req.is_streaming() {
            &self.streaming
        } else {
            &self.http
        };

        let mut builder = http.get(url.clone());
        for (key, value) in &req.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(authorization) = authorization {
            builder = builder.header(AUTHORIZATION, authorization);
        }

        builder.send().await.map_err(Error::Transport)
    }
}

impl CgiGet for CgiClient {
    async fn cgi_get(&self, req: &CgiRequest) -> Result<reqwest::Response, Error> {
        let url = req.url(&self.base_url)?;
        debug!("GET {}", url);

        let cached = self.cached_authorization(&url);
        let resp = self.send(req, &url, cached).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        let challenge = resp
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(Challenge::parse);
        let Some(challenge) = challenge else {
            return Ok(resp);
        };

        debug!(realm = %challenge.realm, "answering digest challenge");
        let authorization = self.store_challenge(challenge, &url);
        self.send(req, &url, Some(authorization)).await
    }
}

// ── Response helpers ────────────────────────────────────────────────

/// Fail on any non-2xx status.
pub fn ok(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(Error::Http {
        status: status.as_u16(),
        message: status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_owned(),
    })
}

/// `key=value` per line response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table(Vec<(String, String)>);

impl Table {
    /// Lines without `=` are skipped.
    pub fn parse(body: &str) -> Self {
        Self(
            body.lines()
                .filter_map(|line| line.split_once('='))
                .map(|(k, v)| (k.to_owned(), v.trim_end_matches('\r').to_owned()))
                .collect(),
        )
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Issue `req`, require 2xx, and parse the body as a [`Table`].
pub async fn get_table(cgi: &impl CgiGet, req: &CgiRequest) -> Result<Table, Error> {
    let resp = ok(cgi.cgi_get(req).await?)?;
    let body = resp.text().await.map_err(Error::Transport)?;
    Ok(Table::parse(&body))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn request_url_encodes_query() {
        let base = Url::parse("http://10.0.0.5/cgi-bin/").unwrap();
        let url = CgiRequest::new("eventManager.cgi")
            .query("action", "attach")
            .query("codes", "[All]")
            .query_int("heartbeat", 5)
            .url(&base)
            .unwrap();

        assert_eq!(url.path(), "/cgi-bin/eventManager.cgi");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("action".into(), "attach".into()),
                ("codes".into(), "[All]".into()),
                ("heartbeat".into(), "5".into()),
            ]
        );
    }

    #[test]
    fn request_without_query_has_no_question_mark() {
        let base = Url::parse("http://10.0.0.5/cgi-bin/").unwrap();
        let url = CgiRequest::new("magicBox.cgi").url(&base).unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.5/cgi-bin/magicBox.cgi");
    }

    #[test]
    fn table_parses_key_value_lines() {
        let table = Table::parse("result=2\r\nnoise\nname=a=b\n");
        assert_eq!(table.get("result"), Some("2"));
        assert_eq!(table.get("name"), Some("a=b"));
        assert_eq!(table.get("noise"), None);
        assert_eq!(table.iter().count(), 2);
    }
}
