//! Error types for the sync engine.

use edusync_core::{MappingError, StoreError};
use serde_json::Value;
use thiserror::Error;

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Failure of a single remote call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The request never produced a response (offline, connection reset).
    #[error("network failure: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the call can be retried.
        retryable: bool,
    },

    /// The server answered with a non-2xx status.
    #[error("server rejected request with status {status}")]
    ServerRejection {
        /// HTTP status.
        status: u16,
        /// Decoded error body, surfaced verbatim.
        body: Value,
    },

    /// The call exceeded the configured timeout.
    #[error("remote call timed out")]
    Timeout,

    /// The request payload could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// The response could not be decoded or mapped.
    #[error("decode error: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Creates a retryable network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a server rejection.
    pub fn rejected(status: u16, body: Value) -> Self {
        Self::ServerRejection { status, body }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Network { retryable, .. } => *retryable,
            RemoteError::Timeout => true,
            RemoteError::ServerRejection { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns the human-readable message from a rejection body, if any.
    ///
    /// Looks at the usual `detail`, `message` and `error` keys.
    pub fn server_message(&self) -> Option<&str> {
        let RemoteError::ServerRejection { body, .. } = self else {
            return None;
        };
        match body {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => ["detail", "message", "error"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str)),
            _ => None,
        }
    }
}

impl From<MappingError> for RemoteError {
    fn from(err: MappingError) -> Self {
        RemoteError::Decode(err.to_string())
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// A remote call failed; local state was rolled back.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The local store rejected the operation.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The result arrived after teardown and was discarded.
    #[error("session detached; result discarded")]
    Detached,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if a mutation was rejected because the record is pending.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Store(err) if err.is_conflict())
    }
}
