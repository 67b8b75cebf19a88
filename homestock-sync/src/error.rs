//! Error types for the sync layer.

use homestock_types::EntityKind;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No response was obtained (connect failure, reset, timeout).
    #[error("network error: {0}")]
    Transport(String),

    /// The server rejected the request (4xx other than 401/403).
    #[error("request rejected ({status}): {message}")]
    Client { status: u16, message: String },

    /// 401 on an authenticated request.
    #[error("authentication error: {0}")]
    Auth(String),

    /// 403: the account may not touch this resource.
    #[error("access denied: {0}")]
    Forbidden(String),

    /// The server failed (5xx).
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The server answered with something the protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The entity is not in the local store.
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// An authenticated call was attempted without a token.
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Builds the error for a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => SyncError::Auth(message),
            403 => SyncError::Forbidden(message),
            500..=599 => SyncError::Server { status, message },
            _ => SyncError::Client { status, message },
        }
    }

    /// Returns true if repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(_) | SyncError::Server { .. } => true,
            SyncError::Client { status, .. } => *status == 429,
            _ => false,
        }
    }

    /// The HTTP status behind this error, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Client { status, .. } | SyncError::Server { status, .. } => Some(*status),
            SyncError::Auth(_) => Some(401),
            SyncError::Forbidden(_) => Some(403),
            _ => None,
        }
    }
}

impl From<homestock_types::Error> for SyncError {
    fn from(err: homestock_types::Error) -> Self {
        match err {
            homestock_types::Error::Serialization(e) => SyncError::Serialization(e),
            homestock_types::Error::UnknownEntityType(key) => SyncError::UnknownEntityType(key),
            other => SyncError::Protocol(other.to_string()),
        }
    }
}
