//! Mirrored collection store with optimistic apply and rollback.
//!
//! A [`CollectionStore`] holds the client's copy of one remote collection
//! as an ordered list of [`RemoteRecord`]s. Screens mutate it before the
//! server answers and either confirm or roll back once the remote call
//! settles:
//!
//! ```text
//! optimistic_* ──► mark_pending ──► remote call ──┬─► confirm / commit_removal
//!                                                 └─► rollback (+ mark_failed)
//! ```
//!
//! ## Invariants
//!
//! - Record order is display order and survives rollback exactly
//! - A record without a server id is never `Clean`
//! - A `Pending` record rejects further optimistic mutations
//! - Rolling back a token twice has no additional effect
//! - The store performs no I/O and never fails on rollback

use crate::error::{StoreError, StoreResult};
use crate::feed::{StoreChange, StoreEvent, StoreFeed};
use crate::id::{LocalId, ServerId};
use crate::record::{RemoteRecord, SyncState};
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::Receiver;
use tracing::{debug, warn};

/// Where an optimistic insert places the new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertPosition {
    /// Before all existing records (newest first lists).
    #[default]
    Head,
    /// After all existing records.
    Tail,
}

/// Captures what is needed to undo one optimistic mutation.
#[derive(Debug, Clone)]
pub struct UndoToken<T> {
    id: u64,
    local_id: LocalId,
    action: UndoAction<T>,
}

#[derive(Debug, Clone)]
enum UndoAction<T> {
    /// Put the previous record value back in place.
    Restore { previous: RemoteRecord<T> },
    /// Re-insert a removed record at its former position.
    Reinsert { record: RemoteRecord<T>, index: usize },
    /// Drop a record that did not exist before.
    Discard,
}

impl<T> UndoToken<T> {
    /// Returns the record this token undoes.
    pub fn local_id(&self) -> &LocalId {
        &self.local_id
    }

    /// Returns the removed record, for tokens produced by a removal.
    pub fn removed_record(&self) -> Option<&RemoteRecord<T>> {
        match &self.action {
            UndoAction::Reinsert { record, .. } => Some(record),
            _ => None,
        }
    }
}

/// Result of a rollback request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// The pre-mutation state was restored.
    Applied,
    /// The token was already rolled back, committed, or invalidated by a load.
    AlreadySettled,
}

/// Ordered local mirror of a remote collection.
#[derive(Debug)]
pub struct CollectionStore<T> {
    records: Vec<RemoteRecord<T>>,
    /// Tokens that may still be rolled back, by token id.
    open_tokens: HashMap<u64, LocalId>,
    next_token: u64,
    /// Server ids with an optimistic removal in flight.
    tombstones: HashSet<ServerId>,
    version: u64,
    feed: StoreFeed,
}

impl<T: Clone> CollectionStore<T> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            open_tokens: HashMap::new(),
            next_token: 1,
            tombstones: HashSet::new(),
            version: 0,
            feed: StoreFeed::new(),
        }
    }

    /// Returns the records in display order.
    pub fn records(&self) -> &[RemoteRecord<T>] {
        &self.records
    }

    /// Iterates the records in display order.
    pub fn iter(&self) -> impl Iterator<Item = &RemoteRecord<T>> {
        self.records.iter()
    }

    /// Returns the number of mirrored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is mirrored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns a record by local id.
    pub fn get(&self, local_id: &LocalId) -> Option<&RemoteRecord<T>> {
        self.records.iter().find(|r| &r.local_id == local_id)
    }

    /// Returns the display position of a record.
    pub fn position(&self, local_id: &LocalId) -> Option<usize> {
        self.records.iter().position(|r| &r.local_id == local_id)
    }

    /// Returns a record by server id.
    pub fn find_by_server_id(&self, server_id: &ServerId) -> Option<&RemoteRecord<T>> {
        self.records
            .iter()
            .find(|r| r.server_id.as_ref() == Some(server_id))
    }

    /// Returns the store version, bumped on every mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Subscribes to mutation events.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        self.feed.subscribe()
    }

    /// Returns the change feed.
    pub fn feed(&self) -> &StoreFeed {
        &self.feed
    }

    /// Returns the number of rollbacks still possible.
    pub fn open_token_count(&self) -> usize {
        self.open_tokens.len()
    }

    /// Replaces the whole mirror with a server snapshot.
    ///
    /// Every record becomes `Clean`. Outstanding undo tokens are
    /// invalidated because they describe a state that no longer exists.
    /// Duplicate server ids keep their first occurrence.
    pub fn load<I>(&mut self, items: I) -> usize
    where
        I: IntoIterator<Item = (ServerId, T)>,
    {
        let mut seen = HashSet::new();
        self.records = items
            .into_iter()
            .filter_map(|(server_id, fields)| {
                if seen.insert(server_id.clone()) {
                    Some(RemoteRecord::from_server(server_id, fields))
                } else {
                    warn!(server_id = %server_id, "duplicate id in loaded snapshot");
                    None
                }
            })
            .collect();
        self.open_tokens.clear();
        self.tombstones.clear();

        let count = self.records.len();
        self.emit(StoreChange::Loaded { count });
        count
    }

    /// Applies `mutator` to a record immediately and marks it `Dirty`.
    pub fn optimistic_update<F>(&mut self, local_id: &LocalId, mutator: F) -> StoreResult<UndoToken<T>>
    where
        F: FnOnce(&mut T),
    {
        let index = self.mutable_index(local_id)?;
        let previous = self.records[index].clone();

        let record = &mut self.records[index];
        mutator(&mut record.fields);
        record.sync_state = SyncState::Dirty;

        let token = self.issue(local_id.clone(), UndoAction::Restore { previous });
        self.emit(StoreChange::Updated(local_id.clone()));
        Ok(token)
    }

    /// Removes a record immediately.
    ///
    /// The token remembers the record and its position so a rollback puts
    /// it back exactly where it was. While the removal is open, polled
    /// snapshots that still list the record do not resurrect it.
    pub fn optimistic_remove(&mut self, local_id: &LocalId) -> StoreResult<UndoToken<T>> {
        let index = self.mutable_index(local_id)?;
        let record = self.records.remove(index);

        if let Some(server_id) = &record.server_id {
            self.tombstones.insert(server_id.clone());
        }

        let token = self.issue(local_id.clone(), UndoAction::Reinsert { record, index });
        self.emit(StoreChange::Removed(local_id.clone()));
        Ok(token)
    }

    /// Inserts a record immediately.
    pub fn optimistic_insert(
        &mut self,
        mut record: RemoteRecord<T>,
        position: InsertPosition,
    ) -> StoreResult<UndoToken<T>> {
        if self.get(&record.local_id).is_some() {
            return Err(StoreError::DuplicateRecord {
                local_id: record.local_id,
            });
        }

        if record.sync_state == SyncState::Clean || record.sync_state == SyncState::Pending {
            record.sync_state = SyncState::Dirty;
        }

        let local_id = record.local_id.clone();
        match position {
            InsertPosition::Head => self.records.insert(0, record),
            InsertPosition::Tail => self.records.push(record),
        }

        let token = self.issue(local_id.clone(), UndoAction::Discard);
        self.emit(StoreChange::Inserted(local_id));
        Ok(token)
    }

    /// Marks a record as having a remote call in flight.
    ///
    /// Fails with [`StoreError::ConcurrentMutation`] if a call is already
    /// in flight for the record.
    pub fn mark_pending(&mut self, local_id: &LocalId) -> StoreResult<()> {
        let index = self.mutable_index(local_id)?;
        self.records[index].sync_state = SyncState::Pending;
        self.emit(StoreChange::Pending(local_id.clone()));
        Ok(())
    }

    /// Applies a successful server response to a record.
    ///
    /// Server fields replace local ones and the record becomes `Clean`.
    /// A server id is assigned if the record had none; an existing id is
    /// kept. Every open token for the record is settled.
    ///
    /// A settled copy of the assigned id, mirrored by a poll that landed
    /// while the create was in flight, is absorbed into the confirmed record.
    pub fn confirm(
        &mut self,
        local_id: &LocalId,
        server_id: Option<ServerId>,
        fields: T,
    ) -> StoreResult<()> {
        let index = self.index_of(local_id)?;
        let record = &mut self.records[index];

        let assigned = if record.server_id.is_some() {
            None
        } else {
            let id = server_id.ok_or_else(|| StoreError::MissingServerId {
                local_id: local_id.clone(),
            })?;
            record.server_id = Some(id.clone());
            Some(id)
        };
        record.fields = fields;
        record.sync_state = SyncState::Clean;

        if let Some(server_id) = assigned {
            self.absorb_duplicates(local_id, &server_id);
        }
        self.settle_tokens(local_id);
        self.emit(StoreChange::Confirmed(local_id.clone()));
        Ok(())
    }

    /// Confirms a record keeping its local fields.
    ///
    /// Used when the server acknowledges a mutation without echoing the
    /// record back.
    pub fn confirm_local(&mut self, local_id: &LocalId) -> StoreResult<()> {
        let index = self.index_of(local_id)?;
        let fields = self.records[index].fields.clone();
        self.confirm(local_id, None, fields)
    }

    /// Settles a removal the server acknowledged.
    ///
    /// Returns false if the token was already settled.
    pub fn commit_removal(&mut self, token: &UndoToken<T>) -> bool {
        if self.open_tokens.remove(&token.id).is_none() {
            return false;
        }
        if let UndoAction::Reinsert { record, .. } = &token.action {
            if let Some(server_id) = &record.server_id {
                self.tombstones.remove(server_id);
            }
        }
        true
    }

    /// Restores the state captured by `token`.
    ///
    /// Idempotent: only the first call for a token has an effect. A load
    /// or a confirm of the same record also settles the token.
    pub fn rollback(&mut self, token: &UndoToken<T>) -> RollbackOutcome {
        if self.open_tokens.remove(&token.id).is_none() {
            debug!(local_id = %token.local_id, "rollback of settled token ignored");
            return RollbackOutcome::AlreadySettled;
        }

        match &token.action {
            UndoAction::Restore { previous } => {
                if let Some(index) = self.position(&token.local_id) {
                    self.records[index] = previous.clone();
                }
            }
            UndoAction::Reinsert { record, index } => {
                if let Some(server_id) = &record.server_id {
                    self.tombstones.remove(server_id);
                }
                if self.position(&token.local_id).is_none() {
                    let at = (*index).min(self.records.len());
                    self.records.insert(at, record.clone());
                }
            }
            UndoAction::Discard => {
                if let Some(index) = self.position(&token.local_id) {
                    self.records.remove(index);
                }
            }
        }

        debug!(local_id = %token.local_id, "optimistic mutation rolled back");
        self.emit(StoreChange::RolledBack(token.local_id.clone()));
        RollbackOutcome::Applied
    }

    /// Flags a record whose last remote call failed.
    ///
    /// No-op if the record is not mirrored (e.g. a rolled-back insert) or
    /// was never persisted: an unsaved record stays `Dirty`.
    pub fn mark_failed(&mut self, local_id: &LocalId) {
        let Some(index) = self.position(local_id) else {
            return;
        };
        if self.records[index].server_id.is_none() {
            debug!(local_id = %local_id, "unsaved record left dirty after failure");
            return;
        }
        self.records[index].sync_state = SyncState::Error;
        self.emit(StoreChange::Failed(local_id.clone()));
    }

    /// Merges a polled server snapshot into the mirror.
    ///
    /// - Order follows the server
    /// - Unsaved local records keep their place: at the head, at the tail,
    ///   or right after the persisted record they followed
    /// - `Dirty`/`Pending` records keep their local fields
    /// - Records with an open removal stay hidden
    /// - Clean records the server no longer lists are dropped
    ///
    /// Returns the record count after the merge.
    pub fn merge_remote<I>(&mut self, items: I) -> usize
    where
        I: IntoIterator<Item = (ServerId, T)>,
    {
        let previous = std::mem::take(&mut self.records);
        let last_persisted = previous.iter().rposition(|r| r.server_id.is_some());
        let mut by_server: HashMap<ServerId, usize> = HashMap::new();
        let mut slots: Vec<Option<RemoteRecord<T>>> = Vec::with_capacity(previous.len());
        let mut unsaved: Vec<(Anchor, RemoteRecord<T>)> = Vec::new();
        let mut next = Vec::with_capacity(previous.len());

        for (index, record) in previous.into_iter().enumerate() {
            match &record.server_id {
                Some(server_id) => {
                    by_server.insert(server_id.clone(), slots.len());
                    slots.push(Some(record));
                }
                None => {
                    let anchor = match (slots.len(), last_persisted) {
                        (0, _) => Anchor::Head,
                        (_, Some(last)) if index > last => Anchor::Tail,
                        (persisted, _) => Anchor::After(persisted - 1),
                    };
                    unsaved.push((anchor, record));
                }
            }
        }
        let persisted_order: Vec<LocalId> = slots
            .iter()
            .flatten()
            .map(|r| r.local_id.clone())
            .collect();

        let mut seen = HashSet::new();
        for (server_id, fields) in items {
            if self.tombstones.contains(&server_id) || !seen.insert(server_id.clone()) {
                continue;
            }
            let existing = by_server
                .get(&server_id)
                .and_then(|&slot| slots[slot].take());
            match existing {
                Some(record) if record.sync_state.is_unsettled() => next.push(record),
                Some(mut record) => {
                    record.fields = fields;
                    record.sync_state = SyncState::Clean;
                    next.push(record);
                }
                None => next.push(RemoteRecord::from_server(server_id, fields)),
            }
        }

        // In-flight records the snapshot does not list yet survive.
        next.extend(
            slots
                .into_iter()
                .flatten()
                .filter(|record| record.sync_state.is_unsettled()),
        );

        self.records = place_unsaved(next, unsaved, &persisted_order);
        let count = self.records.len();
        self.emit(StoreChange::Merged { count });
        count
    }

    fn index_of(&self, local_id: &LocalId) -> StoreResult<usize> {
        self.position(local_id).ok_or_else(|| StoreError::UnknownRecord {
            local_id: local_id.clone(),
        })
    }

    fn mutable_index(&self, local_id: &LocalId) -> StoreResult<usize> {
        let index = self.index_of(local_id)?;
        if !self.records[index].sync_state.accepts_mutation() {
            return Err(StoreError::ConcurrentMutation {
                local_id: local_id.clone(),
            });
        }
        Ok(index)
    }

    fn issue(&mut self, local_id: LocalId, action: UndoAction<T>) -> UndoToken<T> {
        let id = self.next_token;
        self.next_token += 1;
        self.open_tokens.insert(id, local_id.clone());
        UndoToken {
            id,
            local_id,
            action,
        }
    }

    /// Drops settled records other than `keep` that carry `server_id`.
    fn absorb_duplicates(&mut self, keep: &LocalId, server_id: &ServerId) {
        let mut absorbed = Vec::new();
        self.records.retain(|r| {
            let duplicate = &r.local_id != keep && r.server_id.as_ref() == Some(server_id);
            if duplicate && !r.sync_state.is_unsettled() {
                absorbed.push(r.local_id.clone());
                return false;
            }
            if duplicate {
                warn!(server_id = %server_id, local_id = %r.local_id, "unsettled duplicate kept");
            }
            true
        });
        for local_id in absorbed {
            debug!(server_id = %server_id, local_id = %local_id, "polled duplicate absorbed");
            self.settle_tokens(&local_id);
        }
    }

    fn settle_tokens(&mut self, local_id: &LocalId) {
        self.open_tokens.retain(|_, owner| owner != local_id);
    }

    fn emit(&mut self, change: StoreChange) {
        self.version += 1;
        self.feed.emit(StoreEvent {
            version: self.version,
            change,
        });
    }
}

/// Where an unsaved record sat relative to the persisted ones.
#[derive(Debug, Clone, Copy)]
enum Anchor {
    /// Before every persisted record.
    Head,
    /// After every persisted record.
    Tail,
    /// Right after the n-th persisted record.
    After(usize),
}

/// Re-inserts unsaved records into a merged list.
///
/// An `After` anchor whose record was dropped falls back to the nearest
/// earlier persisted record that survived, then to the head.
fn place_unsaved<T>(
    merged: Vec<RemoteRecord<T>>,
    unsaved: Vec<(Anchor, RemoteRecord<T>)>,
    persisted_order: &[LocalId],
) -> Vec<RemoteRecord<T>> {
    if unsaved.is_empty() {
        return merged;
    }

    let kept: HashSet<&LocalId> = merged.iter().map(|r| &r.local_id).collect();
    let mut head = Vec::new();
    let mut tail = Vec::new();
    let mut after: HashMap<LocalId, Vec<RemoteRecord<T>>> = HashMap::new();
    for (anchor, record) in unsaved {
        match anchor {
            Anchor::Head => head.push(record),
            Anchor::Tail => tail.push(record),
            Anchor::After(n) => {
                let survivor = persisted_order[..=n]
                    .iter()
                    .rev()
                    .find(|id| kept.contains(id))
                    .cloned();
                match survivor {
                    Some(id) => after.entry(id).or_default().push(record),
                    None => head.push(record),
                }
            }
        }
    }

    let mut placed = head;
    placed.reserve(merged.len() + tail.len());
    for record in merged {
        let group = after.remove(&record.local_id);
        placed.push(record);
        if let Some(group) = group {
            placed.extend(group);
        }
    }
    placed.extend(tail);
    placed
}

impl<T: Clone> Default for CollectionStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        name: String,
        active: bool,
    }

    fn row(name: &str) -> Row {
        Row {
            name: name.to_string(),
            active: true,
        }
    }

    fn loaded(names: &[(i64, &str)]) -> CollectionStore<Row> {
        let mut store = CollectionStore::new();
        store.load(names.iter().map(|(id, n)| (ServerId::Int(*id), row(n))));
        store
    }

    fn lid(id: i64) -> LocalId {
        LocalId::for_server(&ServerId::Int(id))
    }

    fn names(store: &CollectionStore<Row>) -> Vec<String> {
        store.iter().map(|r| r.fields.name.clone()).collect()
    }

    #[test]
    fn load_assigns_server_ids_and_clean_state() {
        let store = loaded(&[(1, "a"), (2, "b")]);
        assert_eq!(store.len(), 2);
        assert!(store.iter().all(|r| r.sync_state == SyncState::Clean));
        assert_eq!(store.records()[1].server_id, Some(ServerId::Int(2)));
    }

    #[test]
    fn load_drops_duplicate_ids() {
        let store = loaded(&[(1, "a"), (1, "dup"), (2, "b")]);
        assert_eq!(names(&store), vec!["a", "b"]);
    }

    #[test]
    fn optimistic_remove_rollback_restores_position() {
        let mut store = loaded(&[(1, "A"), (2, "B"), (3, "C")]);
        let before = store.records().to_vec();

        let token = store.optimistic_remove(&lid(2)).unwrap();
        assert_eq!(names(&store), vec!["A", "C"]);

        assert_eq!(store.rollback(&token), RollbackOutcome::Applied);
        assert_eq!(store.records(), before.as_slice());
    }

    #[test]
    fn optimistic_update_rollback_restores_value_and_state() {
        let mut store = loaded(&[(1, "A")]);
        let before = store.records().to_vec();

        let token = store
            .optimistic_update(&lid(1), |r| r.active = false)
            .unwrap();
        assert_eq!(store.records()[0].sync_state, SyncState::Dirty);
        assert!(!store.records()[0].fields.active);

        store.mark_pending(&lid(1)).unwrap();
        store.rollback(&token);
        assert_eq!(store.records(), before.as_slice());
    }

    #[test]
    fn optimistic_insert_rollback_discards() {
        let mut store = loaded(&[(1, "A")]);
        let record = RemoteRecord::unsaved(row("new"));
        let token = store.optimistic_insert(record, InsertPosition::Head).unwrap();
        assert_eq!(names(&store), vec!["new", "A"]);

        store.rollback(&token);
        assert_eq!(names(&store), vec!["A"]);
    }

    #[test]
    fn rollback_is_idempotent() {
        let mut store = loaded(&[(1, "A"), (2, "B")]);
        let token = store.optimistic_remove(&lid(1)).unwrap();

        assert_eq!(store.rollback(&token), RollbackOutcome::Applied);
        let after_first = store.records().to_vec();
        let version = store.version();

        assert_eq!(store.rollback(&token), RollbackOutcome::AlreadySettled);
        assert_eq!(store.records(), after_first.as_slice());
        assert_eq!(store.version(), version);
    }

    #[test]
    fn pending_record_rejects_mutation() {
        let mut store = loaded(&[(1, "A")]);
        store.optimistic_update(&lid(1), |r| r.name = "A2".into()).unwrap();
        store.mark_pending(&lid(1)).unwrap();

        let err = store
            .optimistic_update(&lid(1), |r| r.name = "A3".into())
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(store.optimistic_remove(&lid(1)).unwrap_err().is_conflict());
        assert!(store.mark_pending(&lid(1)).unwrap_err().is_conflict());
        assert_eq!(store.records()[0].fields.name, "A2");
    }

    #[test]
    fn confirm_assigns_server_id_and_settles() {
        let mut store: CollectionStore<Row> = CollectionStore::new();
        let record = RemoteRecord::unsaved(row("draft"));
        let local = record.local_id.clone();
        let token = store.optimistic_insert(record, InsertPosition::Tail).unwrap();
        store.mark_pending(&local).unwrap();

        store
            .confirm(&local, Some(ServerId::Int(40)), row("draft (saved)"))
            .unwrap();

        let confirmed = store.get(&local).unwrap();
        assert_eq!(confirmed.server_id, Some(ServerId::Int(40)));
        assert_eq!(confirmed.sync_state, SyncState::Clean);
        assert_eq!(confirmed.fields.name, "draft (saved)");

        // The insert token is settled; rolling back must not drop the row.
        assert_eq!(store.rollback(&token), RollbackOutcome::AlreadySettled);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn confirm_without_server_id_is_rejected_for_unsaved() {
        let mut store: CollectionStore<Row> = CollectionStore::new();
        let record = RemoteRecord::unsaved(row("draft"));
        let local = record.local_id.clone();
        store.optimistic_insert(record, InsertPosition::Tail).unwrap();

        let err = store.confirm(&local, None, row("draft")).unwrap_err();
        assert!(matches!(err, StoreError::MissingServerId { .. }));
        assert_eq!(store.get(&local).unwrap().sync_state, SyncState::Dirty);
    }

    #[test]
    fn confirm_twice_matches_once() {
        let mut store = loaded(&[(1, "A")]);
        store.optimistic_update(&lid(1), |r| r.name = "B".into()).unwrap();

        store.confirm(&lid(1), Some(ServerId::Int(1)), row("B")).unwrap();
        let once = store.records().to_vec();
        store.confirm(&lid(1), Some(ServerId::Int(1)), row("B")).unwrap();
        assert_eq!(store.records(), once.as_slice());
    }

    #[test]
    fn mark_failed_flags_record() {
        let mut store = loaded(&[(1, "A")]);
        let token = store.optimistic_update(&lid(1), |r| r.active = false).unwrap();
        store.rollback(&token);
        store.mark_failed(&lid(1));
        assert_eq!(store.records()[0].sync_state, SyncState::Error);
        assert!(store.records()[0].fields.active);

        // Error does not block the next attempt.
        assert!(store.optimistic_update(&lid(1), |r| r.active = false).is_ok());
    }

    #[test]
    fn load_invalidates_open_tokens() {
        let mut store = loaded(&[(1, "A")]);
        let token = store.optimistic_remove(&lid(1)).unwrap();
        store.load(vec![(ServerId::Int(2), row("B"))]);

        assert_eq!(store.open_token_count(), 0);
        assert_eq!(store.rollback(&token), RollbackOutcome::AlreadySettled);
        assert_eq!(names(&store), vec!["B"]);
    }

    #[test]
    fn merge_keeps_pending_fields_and_follows_server_order() {
        let mut store = loaded(&[(1, "A"), (2, "B"), (3, "C")]);
        store.optimistic_update(&lid(2), |r| r.name = "B-local".into()).unwrap();
        store.mark_pending(&lid(2)).unwrap();

        store.merge_remote(vec![
            (ServerId::Int(3), row("C-server")),
            (ServerId::Int(2), row("B-server")),
            (ServerId::Int(4), row("D")),
        ]);

        assert_eq!(names(&store), vec!["C-server", "B-local", "D"]);
        assert_eq!(store.get(&lid(2)).unwrap().sync_state, SyncState::Pending);
    }

    #[test]
    fn merge_does_not_resurrect_open_removal() {
        let mut store = loaded(&[(1, "A"), (2, "B")]);
        let token = store.optimistic_remove(&lid(2)).unwrap();

        store.merge_remote(vec![(ServerId::Int(1), row("A")), (ServerId::Int(2), row("B"))]);
        assert_eq!(names(&store), vec!["A"]);

        assert!(store.commit_removal(&token));
        assert!(!store.commit_removal(&token));
        store.merge_remote(vec![(ServerId::Int(1), row("A")), (ServerId::Int(2), row("B"))]);
        assert_eq!(names(&store), vec!["A", "B"]);
    }

    #[test]
    fn merge_retains_unsaved_records_at_head() {
        let mut store = loaded(&[(1, "A")]);
        store
            .optimistic_insert(RemoteRecord::unsaved(row("draft")), InsertPosition::Head)
            .unwrap();

        store.merge_remote(vec![(ServerId::Int(5), row("E")), (ServerId::Int(1), row("A"))]);
        assert_eq!(names(&store), vec!["draft", "E", "A"]);
    }

    #[test]
    fn merge_keeps_tail_insert_last() {
        let mut store = loaded(&[(1, "A"), (2, "B")]);
        store
            .optimistic_insert(RemoteRecord::unsaved(row("draft")), InsertPosition::Tail)
            .unwrap();

        store.merge_remote(vec![
            (ServerId::Int(1), row("A")),
            (ServerId::Int(2), row("B")),
            (ServerId::Int(5), row("E")),
        ]);
        assert_eq!(names(&store), vec!["A", "B", "E", "draft"]);
    }

    #[test]
    fn merge_anchors_unsaved_record_after_its_neighbour() {
        let mut store = loaded(&[(1, "A"), (2, "B")]);
        let draft = RemoteRecord::unsaved(row("draft"));
        let saved = RemoteRecord::unsaved(row("saved"));
        let saved_id = saved.local_id.clone();
        store.optimistic_insert(draft, InsertPosition::Tail).unwrap();
        store.optimistic_insert(saved, InsertPosition::Tail).unwrap();
        store.confirm(&saved_id, Some(ServerId::Int(9)), row("saved")).unwrap();
        assert_eq!(names(&store), vec!["A", "B", "draft", "saved"]);

        store.merge_remote(vec![
            (ServerId::Int(1), row("A")),
            (ServerId::Int(2), row("B")),
            (ServerId::Int(7), row("G")),
            (ServerId::Int(9), row("saved")),
        ]);
        assert_eq!(names(&store), vec!["A", "B", "draft", "G", "saved"]);

        // Anchor dropped by the server: fall back to the previous survivor.
        store.merge_remote(vec![
            (ServerId::Int(1), row("A")),
            (ServerId::Int(7), row("G")),
            (ServerId::Int(9), row("saved")),
        ]);
        assert_eq!(names(&store), vec!["A", "draft", "G", "saved"]);
    }

    #[test]
    fn confirm_absorbs_row_merged_while_create_was_in_flight() {
        let mut store = loaded(&[(1, "A")]);
        let draft = RemoteRecord::unsaved(row("new"));
        let local = draft.local_id.clone();
        store.optimistic_insert(draft, InsertPosition::Tail).unwrap();
        store.mark_pending(&local).unwrap();

        store.merge_remote(vec![(ServerId::Int(1), row("A")), (ServerId::Int(50), row("new"))]);
        assert_eq!(store.len(), 3);

        store.confirm(&local, Some(ServerId::Int(50)), row("new")).unwrap();

        let holders: Vec<&LocalId> = store
            .iter()
            .filter(|r| r.server_id == Some(ServerId::Int(50)))
            .map(|r| &r.local_id)
            .collect();
        assert_eq!(holders, vec![&local]);
        assert_eq!(names(&store), vec!["A", "new"]);
        assert!(store.iter().all(|r| r.sync_state == SyncState::Clean));

        // The next poll keeps the single row.
        store.merge_remote(vec![(ServerId::Int(1), row("A")), (ServerId::Int(50), row("new"))]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.find_by_server_id(&ServerId::Int(50)).unwrap().local_id, local);
    }

    #[test]
    fn confirm_keeps_unsettled_duplicate() {
        let mut store = loaded(&[(50, "edited")]);
        store.optimistic_update(&lid(50), |r| r.active = false).unwrap();
        let draft = RemoteRecord::unsaved(row("new"));
        let local = draft.local_id.clone();
        store.optimistic_insert(draft, InsertPosition::Tail).unwrap();

        store.confirm(&local, Some(ServerId::Int(50)), row("new")).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&lid(50)).unwrap().sync_state, SyncState::Dirty);
    }

    #[test]
    fn mark_failed_leaves_unsaved_record_dirty() {
        let mut store = loaded(&[(1, "A")]);
        let draft = RemoteRecord::unsaved(row("draft"));
        let local = draft.local_id.clone();
        store.optimistic_insert(draft, InsertPosition::Tail).unwrap();
        let version = store.version();

        store.mark_failed(&local);
        assert_eq!(store.get(&local).unwrap().sync_state, SyncState::Dirty);
        assert_eq!(store.version(), version);
    }

    #[test]
    fn every_mutation_emits_one_event() {
        let mut store = loaded(&[(1, "A")]);
        let rx = store.subscribe();

        let token = store.optimistic_update(&lid(1), |r| r.active = false).unwrap();
        store.mark_pending(&lid(1)).unwrap();
        store.rollback(&token);

        let changes: Vec<StoreChange> = rx.try_iter().map(|e| e.change).collect();
        assert_eq!(
            changes,
            vec![
                StoreChange::Updated(lid(1)),
                StoreChange::Pending(lid(1)),
                StoreChange::RolledBack(lid(1)),
            ]
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn merge_of_clean_store_follows_server(
                before in prop::collection::btree_set(1i64..60, 0..12),
                after in prop::collection::vec(1i64..60, 0..12),
            ) {
                let mut store = CollectionStore::new();
                store.load(before.iter().map(|id| (ServerId::Int(*id), row("x"))));
                store.merge_remote(after.iter().map(|id| (ServerId::Int(*id), row("y"))));

                let mut expected = Vec::new();
                for id in &after {
                    if !expected.contains(id) {
                        expected.push(*id);
                    }
                }
                let merged: Vec<i64> = store
                    .iter()
                    .filter_map(|r| match &r.server_id {
                        Some(ServerId::Int(id)) => Some(*id),
                        _ => None,
                    })
                    .collect();
                prop_assert_eq!(merged, expected);
                prop_assert!(store.iter().all(|r| r.sync_state == SyncState::Clean));
            }
        }
    }
}
