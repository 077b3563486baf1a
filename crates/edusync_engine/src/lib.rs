//! # EduSync Engine
//!
//! Remote side of EduSync's optimistic collections.
//!
//! This crate provides:
//! - The remote call abstraction ([`RemoteClient`]) and a REST adapter
//! - [`BatchExecutor`], concurrent calls with per-item outcomes
//! - [`NestedDiffSyncer`], create/update/delete reconciliation of child lists
//! - [`PollingRefresher`], a non-overlapping cancellable poll loop
//! - [`ReadStateReconciler`], mark-as-read flows with derived stats
//! - [`Mirror`], the per-screen binding of a store to a collection
//!
//! ## Architecture
//!
//! Every mutation is applied to the local store first, then sent:
//! 1. Apply optimistically and mark the record pending
//! 2. Issue the remote call (the only suspension point)
//! 3. Confirm with the server's answer, or roll back
//!
//! ## Key Invariants
//!
//! - Server is authoritative
//! - Every failure ends in a confirm or a rollback, never a divergent store
//! - Store locks are never held across an `.await`
//! - Results arriving after teardown are discarded

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod batch;
mod config;
mod diff;
mod error;
mod http;
mod mirror;
mod polling;
mod read_state;
mod remote;
mod session;

pub use batch::{BatchExecutor, BatchResult};
pub use config::{ReadBatchMode, SyncConfig};
pub use diff::{
    ChildDraft, ChildError, ChildOp, ChildRoutes, DiffPlan, DiffSnapshot, NestedDiffSyncer,
    SyncOutcome,
};
pub use error::{RemoteError, RemoteResult, SyncError, SyncResult};
pub use http::{HttpClient, HttpRequest, HttpResponse, RestClient};
pub use mirror::{BulkOutcome, CollectionRoutes, Mirror};
pub use polling::{PollState, PollStats, PollingRefresher};
pub use read_state::{
    MarkAllOutcome, Notification, ReadRoutes, ReadStateReconciler, ReadStats, ReadTracked,
};
pub use remote::{encode_payload, Method, MockRemote, RemoteClient, RemoteRequest};
pub use session::{Liveness, Role, SessionContext};
