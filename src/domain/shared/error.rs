//! Call errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Capture permission denied: {0}")]
    PermissionDenied(String),

    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Relay write failed: {0}")]
    RelayWriteFailed(String),

    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("Connectivity failed: {0}")]
    ConnectivityFailed(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}
