// ── Core error types ──
//
// Errors surfaced by fleet services. Device protocol failures are wrapped
// as-is so callers keep access to the `ipcfleet_api::Error` predicates;
// contention and cancellation are ordinary values, never panics.

use thiserror::Error;

/// Failure to acquire an entry in a [`LockStore`](crate::LockStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// `try_lock` found the key held by someone else.
    #[error("resource locked: {key}")]
    ResourceLocked { key: String },

    /// The caller's token was cancelled while waiting.
    #[error("lock wait cancelled")]
    Cancelled,
}

/// Failure of an [`EventBus`](crate::EventBus) operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The bus has shut down; nothing more is accepted.
    #[error("event bus closed")]
    Closed,

    /// The caller's token was cancelled before the operation finished.
    #[error("event bus operation cancelled")]
    Cancelled,

    /// The subscription was closed because its handler returned an error.
    #[error("subscriber handler failed: {0}")]
    Handler(String),
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Fleet ────────────────────────────────────────────────────────
    #[error("Device not found: {id}")]
    DeviceNotFound { id: String },

    #[error("Invalid scan range: {message}")]
    InvalidRange { message: String },

    // ── Device protocol ──────────────────────────────────────────────
    #[error(transparent)]
    Api(#[from] ipcfleet_api::Error),

    // ── Coordination ─────────────────────────────────────────────────
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("Operation cancelled")]
    Cancelled,

    // ── Collaborators ────────────────────────────────────────────────
    /// The file-catalog sink rejected a batch.
    #[error("File sink error: {message}")]
    Sink { message: String },
}

impl CoreError {
    /// Returns `true` if retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api(e) => e.is_transient(),
            Self::Lock(LockError::ResourceLocked { .. }) => true,
            _ => false,
        }
    }

    /// The wrapped protocol error, if any.
    pub fn api(&self) -> Option<&ipcfleet_api::Error> {
        match self {
            Self::Api(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_resource_is_transient() {
        let err = CoreError::from(LockError::ResourceLocked { key: "cam-1".into() });
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "resource locked: cam-1");
    }

    #[test]
    fn api_errors_keep_their_predicates() {
        let err = CoreError::from(ipcfleet_api::Error::StreamEnded);
        assert!(err.is_transient());
        assert!(matches!(err.api(), Some(ipcfleet_api::Error::StreamEnded)));
        assert!(!CoreError::Cancelled.is_transient());
    }
}
