//! Errors raised by external collaborators.

use thiserror::Error;

/// Errors a storage client may raise while performing an operation.
///
/// These are transport-level problems. A store that answers "no" reports
/// that through a normal response, not through this type.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The endpoint could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The service answered with an error status.
    #[error("service error {status}: {message}")]
    Service {
        /// Status code returned by the service.
        status: u16,
        /// Message returned by the service.
        message: String,
    },

    /// The request was malformed for this client.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Errors a fault injector may raise.
#[derive(Debug, Error)]
pub enum FaultError {
    /// The component could not be destroyed.
    #[error("failed to inject fault into {component}: {reason}")]
    InjectFailed {
        /// Component that was targeted.
        component: String,
        /// Reason reported by the injector.
        reason: String,
    },

    /// The component could not be brought back.
    #[error("failed to restore {component}: {reason}")]
    RestoreFailed {
        /// Component that was targeted.
        component: String,
        /// Reason reported by the injector.
        reason: String,
    },

    /// The cluster did not reach the expected state after injection.
    #[error("cluster not in expected state: {0}")]
    UnexpectedState(String),
}
