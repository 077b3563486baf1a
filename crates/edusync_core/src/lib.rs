//! # EduSync Core
//!
//! Local mirrors of remote collections for EduSync.
//!
//! This crate provides:
//! - [`RemoteRecord`] and its [`SyncState`] lifecycle
//! - [`CollectionStore`], an ordered mirror with optimistic
//!   insert/update/remove and exact rollback via [`UndoToken`]s
//! - A change feed so views can observe every mutation
//! - Boundary mapping of server payloads ([`RecordMapper`])
//!
//! ## Key Invariants
//!
//! - The server is authoritative; local state is either confirmed or
//!   rolled back, never left divergent
//! - Rollback needs no I/O and restores value, presence and position
//! - A record with a remote call in flight rejects new mutations
//!
//! The crate is synchronous and performs no I/O. The async remote side
//! lives in `edusync_engine`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod error;
mod feed;
mod id;
mod mapping;
mod record;
mod store;

pub use error::{MappingError, StoreError, StoreResult};
pub use feed::{StoreChange, StoreEvent, StoreFeed};
pub use id::{LocalId, ServerId};
pub use mapping::{JsonMapper, RecordMapper, DEFAULT_ENVELOPES, DEFAULT_ID_FIELDS};
pub use record::{RemoteRecord, SyncState};
pub use store::{CollectionStore, InsertPosition, RollbackOutcome, UndoToken};

use parking_lot::RwLock;
use std::sync::Arc;

/// A store shared between a screen and its in-flight remote calls.
///
/// Locks are held only for the synchronous store call, never across an
/// `.await`.
pub type SharedStore<T> = Arc<RwLock<CollectionStore<T>>>;

/// Creates an empty shared store.
pub fn shared_store<T: Clone>() -> SharedStore<T> {
    Arc::new(RwLock::new(CollectionStore::new()))
}
