//! CLI error types with miette diagnostics.
//!
//! Maps core, protocol and config failures into user-facing errors with
//! actionable help text and a stable exit code.

use miette::Diagnostic;
use thiserror::Error;

use ipcfleet_api::{Error as ApiError, LoginFailure};
use ipcfleet_config::ConfigError;
use ipcfleet_core::{BusError, CoreError, LockError};

/// Process exit codes.
#[allow(dead_code)]
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const PERMISSION: i32 = 5;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach device at {url}")]
    #[diagnostic(
        code(ipcfleet::connection_failed),
        help("Check that the camera is powered and reachable from this host.")
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Request timed out")]
    #[diagnostic(
        code(ipcfleet::timeout),
        help("Raise `defaults.timeout` in the config or check the device's responsiveness.")
    )]
    Timeout,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Login to '{device}' failed: {reason}")]
    #[diagnostic(
        code(ipcfleet::auth_failed),
        help("Verify the username and password for this device. Locked accounts unlock on the camera's own schedule.")
    )]
    AuthFailed { device: String, reason: LoginFailure },

    #[error("No password configured for device '{device}'")]
    #[diagnostic(
        code(ipcfleet::no_credentials),
        help("Set `password_env`, store one in the keyring under service 'ipcfleet' as '{device}/password', or add `password` to the device entry.")
    )]
    NoCredentials { device: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("Device '{identifier}' not found")]
    #[diagnostic(
        code(ipcfleet::not_found),
        help("Run: ipcfleet devices to see configured devices")
    )]
    DeviceNotFound { identifier: String },

    #[error("Device '{device}' is busy")]
    #[diagnostic(
        code(ipcfleet::conflict),
        help("Another scan holds this device. Try again when it finishes.")
    )]
    Busy { device: String },

    // ── Device ───────────────────────────────────────────────────────
    #[error("Device error ({code}): {message}")]
    #[diagnostic(code(ipcfleet::device_error))]
    DeviceError { code: i64, message: String },

    #[error(transparent)]
    #[diagnostic(code(ipcfleet::protocol))]
    Protocol(ApiError),

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(ipcfleet::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("{source}")]
    #[diagnostic(
        code(ipcfleet::config),
        help("Check the config file at {path}")
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("Interrupted")]
    #[diagnostic(code(ipcfleet::cancelled))]
    Cancelled,

    #[error(transparent)]
    #[diagnostic(code(ipcfleet::internal))]
    Core(CoreError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(ipcfleet::json), help("Pass params as a JSON value, e.g. --params '{{\"name\": \"General\"}}'"))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout => exit_code::TIMEOUT,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::DeviceNotFound { .. } => exit_code::NOT_FOUND,
            Self::Busy { .. } => exit_code::CONFLICT,
            Self::Validation { .. } | Self::Json(_) | Self::Config { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }

    /// Wrap a config failure, remembering which file it came from.
    pub fn config(path: &std::path::Path, source: ConfigError) -> Self {
        match source {
            ConfigError::UnknownDevice { device } => Self::DeviceNotFound { identifier: device },
            ConfigError::NoCredentials { device } => Self::NoCredentials { device },
            source => Self::Config {
                path: path.display().to_string(),
                source,
            },
        }
    }

    /// Attach the device id to a protocol error.
    pub fn device(device: &str, err: ApiError) -> Self {
        match err {
            ApiError::Login { reason, .. } => Self::AuthFailed {
                device: device.to_owned(),
                reason,
            },
            other => other.into(),
        }
    }
}

// ── ApiError → CliError mapping ──────────────────────────────────────

impl From<ApiError> for CliError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Transport(e) if e.is_timeout() => Self::Timeout,
            ApiError::Transport(e) if e.is_connect() => Self::ConnectionFailed {
                url: e.url().map(ToString::to_string).unwrap_or_default(),
                source: Box::new(e),
            },
            ApiError::Login { reason, .. } => Self::AuthFailed {
                device: "(unknown)".into(),
                reason,
            },
            ApiError::Rpc(e) => Self::DeviceError {
                code: e.code,
                message: e.message,
            },
            other => Self::Protocol(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::DeviceNotFound { id } => Self::DeviceNotFound { identifier: id },
            CoreError::InvalidRange { message } => Self::Validation {
                field: "range".into(),
                reason: message,
            },
            CoreError::Api(e) => e.into(),
            CoreError::Lock(LockError::ResourceLocked { key }) => Self::Busy { device: key },
            CoreError::Cancelled | CoreError::Lock(LockError::Cancelled) | CoreError::Bus(BusError::Cancelled) => {
                Self::Cancelled
            }
            other => Self::Core(other),
        }
    }
}

impl From<BusError> for CliError {
    fn from(err: BusError) -> Self {
        CoreError::Bus(err).into()
    }
}
