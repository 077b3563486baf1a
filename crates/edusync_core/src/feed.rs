//! Change feed for observing store mutations.
//!
//! Every mutation of a [`CollectionStore`](crate::CollectionStore) emits
//! exactly one [`StoreEvent`], enabling:
//! - Reactive UI updates (subscribe and re-render)
//! - Polling consumers (read events after a version cursor)
//! - Test assertions on the mutation sequence
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut store = CollectionStore::new();
//! let events = store.subscribe();
//!
//! store.load(rows);
//! assert!(matches!(events.recv()?.change, StoreChange::Loaded { .. }));
//! ```

use crate::id::LocalId;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// What a store mutation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// The whole mirror was replaced.
    Loaded {
        /// Number of records after the load.
        count: usize,
    },
    /// A polled snapshot was merged into the mirror.
    Merged {
        /// Number of records after the merge.
        count: usize,
    },
    /// A record was optimistically inserted.
    Inserted(LocalId),
    /// A record was optimistically updated.
    Updated(LocalId),
    /// A record was optimistically removed.
    Removed(LocalId),
    /// A record's remote call went in flight.
    Pending(LocalId),
    /// A record was confirmed by the server.
    Confirmed(LocalId),
    /// A mutation was undone.
    RolledBack(LocalId),
    /// A record was flagged as failed.
    Failed(LocalId),
}

/// A single event from the store feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    /// Store version after the mutation.
    pub version: u64,
    /// The mutation.
    pub change: StoreChange,
}

/// Distributes store events to subscribers.
///
/// The feed:
/// - Preserves mutation order
/// - Supports multiple subscribers
/// - Keeps a bounded history for polling
pub struct StoreFeed {
    subscribers: RwLock<Vec<Sender<StoreEvent>>>,
    history: RwLock<Vec<StoreEvent>>,
    max_history: usize,
}

impl StoreFeed {
    /// Creates a new feed.
    pub fn new() -> Self {
        Self::with_max_history(1024)
    }

    /// Creates a feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
        }
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits an event to all subscribers.
    pub fn emit(&self, event: StoreEvent) {
        {
            let mut history = self.history.write();
            history.push(event.clone());
            if history.len() > self.max_history {
                let to_remove = history.len() - self.max_history;
                history.drain(0..to_remove);
            }
        }

        // Drop subscribers whose receiver is gone.
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns events with version > cursor, up to limit.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<StoreEvent> {
        let history = self.history.read();
        history
            .iter()
            .filter(|e| e.version > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns the number of events in history.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

impl Default for StoreFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StoreFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreFeed")
            .field("subscribers", &self.subscriber_count())
            .field("history", &self.history_len())
            .finish()
    }
}
