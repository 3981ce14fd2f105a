use thiserror::Error;

use crate::rpc::{ErrorKind, LoginFailure, ResponseError};

/// Top-level error type for the `ipcfleet-api` crate.
///
/// Covers the RPC codec, the login handshake, the CGI client and the
/// multipart event reader. `ipcfleet-core` wraps these in `CoreError`.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// I/O error while reading a streamed response body.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Device answered with a non-2xx HTTP status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// Malformed wire payload, with a preview of the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Decode { message: String, body: String },

    // ── Protocol ────────────────────────────────────────────────────
    /// The device returned a populated `error` object.
    #[error("RPC error: {0}")]
    Rpc(ResponseError),

    /// The session token was rejected. Recovered by re-authenticating.
    #[error("Session invalid: {0}")]
    SessionInvalid(ResponseError),

    /// The device answered outside the expected handshake contract.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Credential or account level login rejection. Never retried automatically.
    #[error("Login failed: {reason}")]
    Login {
        reason: LoginFailure,
        #[source]
        source: ResponseError,
    },

    // ── Streams ─────────────────────────────────────────────────────
    /// The event stream ended without another boundary marker.
    #[error("Event stream ended")]
    StreamEnded,
}

impl From<ResponseError> for Error {
    fn from(err: ResponseError) -> Self {
        if err.kind == ErrorKind::InvalidSession {
            Self::SessionInvalid(err)
        } else {
            Self::Rpc(err)
        }
    }
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Io(_) | Self::StreamEnded => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if re-authenticating might resolve this error.
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, Self::SessionInvalid(_))
    }

    /// Returns `true` if the device reported an empty result set.
    pub fn is_no_data(&self) -> bool {
        self.response_error()
            .is_some_and(|e| e.kind == ErrorKind::NoData)
    }

    /// The device's structured error, if this error carries one.
    pub fn response_error(&self) -> Option<&ResponseError> {
        match self {
            Self::Rpc(e) | Self::SessionInvalid(e) | Self::Login { source: e, .. } => Some(e),
            _ => None,
        }
    }

    /// The classified login rejection, if any.
    pub fn login_failure(&self) -> Option<LoginFailure> {
        match self {
            Self::Login { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

const BODY_PREVIEW_CHARS: usize = 512;

/// Truncate a response body for inclusion in error values and logs.
pub(crate) fn body_preview(body: &str) -> String {
    if body.chars().count() <= BODY_PREVIEW_CHARS {
        return body.to_owned();
    }
    let mut preview: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
    preview.push_str("...");
    preview
}

pub(crate) fn decode_error(err: &serde_json::Error, body: &str) -> Error {
    Error::Decode {
        message: err.to_string(),
        body: body_preview(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_error(code: i64) -> ResponseError {
        ResponseError::new("global.keepAlive", code, "boom")
    }

    #[test]
    fn session_codes_become_session_invalid() {
        assert!(Error::from(response_error(287_637_504)).is_session_invalid());
        assert!(Error::from(response_error(287_637_505)).is_session_invalid());
        assert!(!Error::from(response_error(268_894_210)).is_session_invalid());
    }

    #[test]
    fn no_data_is_detected() {
        assert!(Error::from(response_error(285_409_284)).is_no_data());
        assert!(!Error::StreamEnded.is_no_data());
    }

    #[test]
    fn body_preview_truncates_long_bodies() {
        let body = "x".repeat(2000);
        let preview = body_preview(&body);
        assert_eq!(preview.len(), BODY_PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
        assert_eq!(body_preview("short"), "short");
    }
}
