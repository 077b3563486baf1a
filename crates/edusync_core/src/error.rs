//! Error types for EduSync core.

use crate::id::LocalId;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a [`CollectionStore`](crate::CollectionStore).
///
/// The store performs no I/O; every variant is a caller contract
/// violation that is rejected synchronously without touching state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No record with this id is mirrored.
    #[error("record not found: {local_id}")]
    UnknownRecord {
        /// The id that was looked up.
        local_id: LocalId,
    },

    /// A record with this id is already mirrored.
    #[error("duplicate record: {local_id}")]
    DuplicateRecord {
        /// The conflicting id.
        local_id: LocalId,
    },

    /// The record has a remote call in flight.
    #[error("record {local_id} has a remote call in flight")]
    ConcurrentMutation {
        /// The record that is pending.
        local_id: LocalId,
    },

    /// Confirming would leave a record without a server identity.
    #[error("record {local_id} cannot be confirmed without a server id")]
    MissingServerId {
        /// The unsaved record.
        local_id: LocalId,
    },

    /// A server payload could not be mapped to the canonical shape.
    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),
}

impl StoreError {
    /// Returns true if this error rejected a mutation on a pending record.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrentMutation { .. })
    }
}

/// Errors raised while mapping server payloads at the boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MappingError {
    /// The payload carries none of the accepted id fields.
    #[error("no id field found (tried {tried})")]
    MissingId {
        /// Comma-separated list of the fields that were tried.
        tried: String,
    },

    /// The payload did not deserialize into the target type.
    #[error("payload does not match {target}: {message}")]
    Shape {
        /// Name of the target type.
        target: &'static str,
        /// Deserializer message.
        message: String,
    },

    /// A list response was not an array.
    #[error("expected a list response, got {found}")]
    NotAList {
        /// JSON type that was found instead.
        found: &'static str,
    },
}
