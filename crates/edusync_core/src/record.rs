//! Locally mirrored records.

use crate::id::{LocalId, ServerId};

/// Synchronization state of a mirrored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// Matches the server.
    Clean,
    /// Mutated locally, not yet sent.
    Dirty,
    /// A remote call for this record is in flight.
    Pending,
    /// The last remote call failed and was rolled back.
    ///
    /// Informational only: `fields` already hold the restored value. The
    /// next mutation, confirm or load clears it.
    Error,
}

impl SyncState {
    /// Returns true if the record can accept a new optimistic mutation.
    pub fn accepts_mutation(&self) -> bool {
        !matches!(self, SyncState::Pending)
    }

    /// Returns true if local fields differ, or may differ, from the server.
    pub fn is_unsettled(&self) -> bool {
        matches!(self, SyncState::Dirty | SyncState::Pending)
    }
}

/// One entity mirrored from a remote collection.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord<T> {
    /// Stable client-side identity.
    pub local_id: LocalId,
    /// Identity assigned by the server, absent until first persisted.
    pub server_id: Option<ServerId>,
    /// Domain payload.
    pub fields: T,
    /// Synchronization state.
    pub sync_state: SyncState,
}

impl<T> RemoteRecord<T> {
    /// Creates a record loaded from the server.
    pub fn from_server(server_id: ServerId, fields: T) -> Self {
        Self {
            local_id: LocalId::for_server(&server_id),
            server_id: Some(server_id),
            fields,
            sync_state: SyncState::Clean,
        }
    }

    /// Creates a record the server has not seen yet.
    pub fn unsaved(fields: T) -> Self {
        Self {
            local_id: LocalId::generate(),
            server_id: None,
            fields,
            sync_state: SyncState::Dirty,
        }
    }

    /// Returns true if the server has assigned an identity.
    pub fn is_persisted(&self) -> bool {
        self.server_id.is_some()
    }
}
