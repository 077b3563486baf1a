//! Mark-as-read reconciliation with derived statistics.
//!
//! Read flags are flipped optimistically and the derived [`ReadStats`] are
//! republished before the server answers. Stats are always recomputed from
//! the store contents and never adjusted incrementally, so a rollback of
//! the records rolls the counts back with them.
//!
//! Changes made by others (a polled merge, a reload) reach subscribers
//! through [`ReadStateReconciler::follow_store`], which recomputes on every
//! store event.

use crate::batch::BatchExecutor;
use crate::config::ReadBatchMode;
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::remote::{RemoteClient, RemoteRequest};
use crate::session::Liveness;
use chrono::{DateTime, Utc};
use edusync_core::{CollectionStore, LocalId, ServerId, SharedStore, StoreError, UndoToken};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How often the store follower rechecks liveness while the store is quiet.
const FOLLOW_TICK: Duration = Duration::from_millis(50);

/// A record with a read flag.
pub trait ReadTracked {
    /// Returns true if the record was read.
    fn is_read(&self) -> bool;

    /// Sets the read flag and read time.
    fn mark_read(&mut self, at: DateTime<Utc>);

    /// Category used for per-type counts.
    fn kind(&self) -> &str;

    /// Priority used for per-priority counts.
    fn priority(&self) -> &str;
}

fn default_priority() -> String {
    "normal".into()
}

/// A user notification as served by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Title.
    pub title: String,
    /// Body text.
    #[serde(default)]
    pub message: String,
    /// Category (e.g. "grade", "attendance", "payment").
    #[serde(default, alias = "type", alias = "notification_type")]
    pub kind: String,
    /// Priority (e.g. "low", "normal", "high").
    #[serde(default = "default_priority")]
    pub priority: String,
    /// Read flag.
    #[serde(default, alias = "is_read")]
    pub read: bool,
    /// When the notification was read.
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Creates an unread notification.
    pub fn new(title: impl Into<String>, kind: impl Into<String>, priority: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: String::new(),
            kind: kind.into(),
            priority: priority.into(),
            read: false,
            read_at: None,
        }
    }
}

impl ReadTracked for Notification {
    fn is_read(&self) -> bool {
        self.read
    }

    fn mark_read(&mut self, at: DateTime<Utc>) {
        self.read = true;
        self.read_at = Some(at);
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn priority(&self) -> &str {
        &self.priority
    }
}

/// Counts derived from a collection of read-tracked records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadStats {
    /// Number of records.
    pub total: usize,
    /// Unread records.
    pub unread: usize,
    /// Read records.
    pub read: usize,
    /// Records per kind.
    pub by_type: BTreeMap<String, usize>,
    /// Records per priority.
    pub by_priority: BTreeMap<String, usize>,
}

impl ReadStats {
    /// Computes stats over `records`.
    pub fn compute<'a, T, I>(records: I) -> Self
    where
        T: ReadTracked + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let mut stats = Self::default();
        for record in records {
            stats.total += 1;
            if record.is_read() {
                stats.read += 1;
            } else {
                stats.unread += 1;
            }
            *stats.by_type.entry(record.kind().to_string()).or_default() += 1;
            *stats.by_priority.entry(record.priority().to_string()).or_default() += 1;
        }
        stats
    }
}

fn stats_of<T: ReadTracked + Clone>(store: &CollectionStore<T>) -> ReadStats {
    ReadStats::compute(store.iter().map(|r| &r.fields))
}

fn publish(sender: &watch::Sender<ReadStats>, stats: ReadStats) {
    sender.send_if_modified(|published| {
        if *published == stats {
            return false;
        }
        *published = stats;
        true
    });
}

/// Request builders for the read endpoints.
pub trait ReadRoutes: Send + Sync {
    /// Marks one record read.
    fn mark_read(&self, id: &ServerId) -> RemoteRequest;

    /// Marks many records read in one call.
    fn mark_all_read(&self, ids: &[ServerId]) -> RemoteRequest;
}

/// Result of [`ReadStateReconciler::mark_all_read`].
#[derive(Debug, Clone, PartialEq)]
pub enum MarkAllOutcome {
    /// Nothing was selected, or everything selected was already read.
    /// No call was made.
    NothingToDo,
    /// The calls settled.
    Completed {
        /// Records confirmed read.
        marked: Vec<LocalId>,
        /// Records rolled back, with the error.
        failed: Vec<(LocalId, RemoteError)>,
    },
}

impl MarkAllOutcome {
    /// Returns true if no call was needed.
    pub fn is_noop(&self) -> bool {
        matches!(self, MarkAllOutcome::NothingToDo)
    }

    /// Returns the records that were rolled back.
    pub fn failed_ids(&self) -> Vec<LocalId> {
        match self {
            MarkAllOutcome::NothingToDo => Vec::new(),
            MarkAllOutcome::Completed { failed, .. } => {
                failed.iter().map(|(id, _)| id.clone()).collect()
            }
        }
    }
}

/// Drives mark-as-read flows against a shared store.
pub struct ReadStateReconciler<T, R, Q> {
    store: SharedStore<T>,
    remote: Arc<R>,
    routes: Q,
    mode: ReadBatchMode,
    executor: BatchExecutor,
    stats: Arc<watch::Sender<ReadStats>>,
    liveness: Liveness,
}

impl<T, R, Q> ReadStateReconciler<T, R, Q>
where
    T: ReadTracked + Clone + Send + Sync,
    R: RemoteClient,
    Q: ReadRoutes,
{
    /// Creates a reconciler publishing stats of the current store contents.
    pub fn new(store: SharedStore<T>, remote: Arc<R>, routes: Q, mode: ReadBatchMode) -> Self {
        let initial = stats_of(&store.read());
        let (stats, _) = watch::channel(initial);
        Self {
            store,
            remote,
            routes,
            mode,
            executor: BatchExecutor::new(),
            stats: Arc::new(stats),
            liveness: Liveness::new(),
        }
    }

    /// Uses `executor` for per-item batches.
    pub fn with_executor(mut self, executor: BatchExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Discards results once `liveness` dies.
    pub fn with_liveness(mut self, liveness: Liveness) -> Self {
        self.liveness = liveness;
        self
    }

    /// Returns the batch policy.
    pub fn mode(&self) -> ReadBatchMode {
        self.mode
    }

    /// Returns the stats of the current store contents.
    ///
    /// Subscribers are notified if the published value was stale.
    pub fn stats(&self) -> ReadStats {
        self.refresh_stats()
    }

    /// Subscribes to stats updates.
    ///
    /// Updates cover this reconciler's own flows; call
    /// [`follow_store`](Self::follow_store) to also cover every other
    /// change to the store.
    pub fn subscribe(&self) -> watch::Receiver<ReadStats> {
        self.stats.subscribe()
    }

    /// Recomputes stats from the store and publishes them if they changed.
    pub fn refresh_stats(&self) -> ReadStats {
        let stats = stats_of(&self.store.read());
        publish(&self.stats, stats.clone());
        stats
    }

    /// Republishes stats after every change to the store, whoever made it.
    ///
    /// The follower runs on the blocking pool, draining the store's change
    /// feed, until this reconciler's liveness dies or the store is dropped.
    pub fn follow_store(&self) -> JoinHandle<()>
    where
        T: 'static,
    {
        let events = self.store.read().subscribe();
        let store = Arc::downgrade(&self.store);
        let stats = Arc::clone(&self.stats);
        let liveness = self.liveness.clone();

        tokio::task::spawn_blocking(move || {
            while liveness.is_alive() {
                match events.recv_timeout(FOLLOW_TICK) {
                    Ok(_) => {
                        // One recompute per burst.
                        while events.try_recv().is_ok() {}
                        let Some(store) = store.upgrade() else {
                            break;
                        };
                        let current = stats_of(&store.read());
                        publish(&stats, current);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("read stats follower stopped");
        })
    }

    /// Marks one record read.
    ///
    /// Already-read records make no call. On failure the record and the
    /// stats are restored and the record is flagged `Error`.
    pub async fn mark_read(&self, local_id: &LocalId) -> SyncResult<()> {
        let (token, server_id) = {
            let mut store = self.store.write();
            let record = store.get(local_id).ok_or_else(|| StoreError::UnknownRecord {
                local_id: local_id.clone(),
            })?;
            if record.fields.is_read() {
                return Ok(());
            }
            let server_id = record
                .server_id
                .clone()
                .ok_or_else(|| StoreError::MissingServerId {
                    local_id: local_id.clone(),
                })?;

            let token = store.optimistic_update(local_id, |fields| fields.mark_read(Utc::now()))?;
            store.mark_pending(local_id)?;
            (token, server_id)
        };
        self.refresh_stats();

        let result = self.remote.call(self.routes.mark_read(&server_id)).await;
        if !self.liveness.is_alive() {
            debug!(local_id = %local_id, "mark read settled after teardown");
            return Err(SyncError::Detached);
        }

        match result {
            Ok(_) => {
                if let Err(err) = self.store.write().confirm_local(local_id) {
                    debug!(local_id = %local_id, error = %err, "marked record no longer mirrored");
                }
                self.refresh_stats();
                Ok(())
            }
            Err(err) => {
                warn!(local_id = %local_id, error = %err, "mark read failed; rolled back");
                {
                    let mut store = self.store.write();
                    store.rollback(&token);
                    store.mark_failed(local_id);
                }
                self.refresh_stats();
                Err(err.into())
            }
        }
    }

    /// Marks many records read.
    ///
    /// An empty selection, or one where every record is already read, is a
    /// no-op that reports [`MarkAllOutcome::NothingToDo`]. Unknown,
    /// unsaved and pending records are skipped.
    ///
    /// With [`ReadBatchMode::PerItem`] only failed records are rolled back;
    /// with [`ReadBatchMode::BulkEndpoint`] one failure rolls back all.
    pub async fn mark_all_read(&self, ids: &[LocalId]) -> SyncResult<MarkAllOutcome> {
        if ids.is_empty() {
            info!("mark all read: nothing selected");
            return Ok(MarkAllOutcome::NothingToDo);
        }

        let mut tokens: HashMap<LocalId, UndoToken<T>> = HashMap::new();
        let mut targets: Vec<(LocalId, ServerId)> = Vec::new();
        {
            let mut store = self.store.write();
            let now = Utc::now();
            for local_id in ids {
                let Some(record) = store.get(local_id) else {
                    debug!(local_id = %local_id, "mark all read: unknown record skipped");
                    continue;
                };
                if record.fields.is_read() || tokens.contains_key(local_id) {
                    continue;
                }
                let Some(server_id) = record.server_id.clone() else {
                    continue;
                };
                let token = match store.optimistic_update(local_id, |fields| fields.mark_read(now)) {
                    Ok(token) => token,
                    Err(err) => {
                        debug!(local_id = %local_id, error = %err, "mark all read: record skipped");
                        continue;
                    }
                };
                store.mark_pending(local_id)?;
                tokens.insert(local_id.clone(), token);
                targets.push((local_id.clone(), server_id));
            }
        }

        if targets.is_empty() {
            info!("mark all read: everything already read");
            return Ok(MarkAllOutcome::NothingToDo);
        }
        self.refresh_stats();

        let settled: Vec<(LocalId, Result<(), RemoteError>)> = match self.mode {
            ReadBatchMode::PerItem => {
                let batch = self
                    .executor
                    .run_all(targets, |(_, server_id)| {
                        let request = self.routes.mark_read(&server_id);
                        let remote = Arc::clone(&self.remote);
                        async move { remote.call(request).await }
                    })
                    .await;
                batch
                    .succeeded
                    .into_iter()
                    .map(|((local_id, _), _)| (local_id, Ok(())))
                    .chain(
                        batch
                            .failed
                            .into_iter()
                            .map(|((local_id, _), err)| (local_id, Err(err))),
                    )
                    .collect()
            }
            ReadBatchMode::BulkEndpoint => {
                let server_ids: Vec<ServerId> = targets.iter().map(|(_, id)| id.clone()).collect();
                let result = self
                    .remote
                    .call(self.routes.mark_all_read(&server_ids))
                    .await
                    .map(|_| ());
                targets
                    .into_iter()
                    .map(|(local_id, _)| (local_id, result.clone()))
                    .collect()
            }
        };

        if !self.liveness.is_alive() {
            debug!("mark all read settled after teardown");
            return Err(SyncError::Detached);
        }

        let mut marked = Vec::new();
        let mut failed = Vec::new();
        {
            let mut store = self.store.write();
            for (local_id, outcome) in settled {
                match outcome {
                    Ok(()) => {
                        // Gone from the store (e.g. reloaded mid-flight):
                        // the server marked it, so there is nothing to undo.
                        if let Err(err) = store.confirm_local(&local_id) {
                            debug!(local_id = %local_id, error = %err, "marked record no longer mirrored");
                        }
                        marked.push(local_id);
                    }
                    Err(err) => failed.push((local_id, err)),
                }
            }
            for (local_id, _) in failed.iter().rev() {
                if let Some(token) = tokens.get(local_id) {
                    store.rollback(token);
                }
                store.mark_failed(local_id);
            }
        }

        if !failed.is_empty() {
            warn!(
                marked = marked.len(),
                failed = failed.len(),
                "mark all read partially rolled back"
            );
        }
        self.refresh_stats();
        Ok(MarkAllOutcome::Completed { marked, failed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{Method, MockRemote};
    use edusync_core::{shared_store, SyncState};
    use serde_json::json;

    struct NotificationRoutes;

    impl ReadRoutes for NotificationRoutes {
        fn mark_read(&self, id: &ServerId) -> RemoteRequest {
            RemoteRequest::post(format!("/notifications/{id}/read"), json!({}))
        }

        fn mark_all_read(&self, ids: &[ServerId]) -> RemoteRequest {
            let ids: Vec<_> = ids.iter().map(ServerId::to_json).collect();
            RemoteRequest::post("/notifications/mark-all-read", json!({ "ids": ids }))
        }
    }

    fn inbox() -> SharedStore<Notification> {
        let store = shared_store();
        store.write().load(vec![
            (ServerId::Int(1), Notification::new("Grade posted", "grade", "high")),
            (ServerId::Int(2), Notification::new("Absent today", "attendance", "normal")),
            (ServerId::Int(3), Notification::new("Invoice due", "payment", "high")),
            (ServerId::Int(4), {
                let mut seen = Notification::new("Welcome", "system", "low");
                seen.read = true;
                seen
            }),
        ]);
        store
    }

    fn lid(id: i64) -> LocalId {
        LocalId::for_server(&ServerId::Int(id))
    }

    fn reconciler(
        store: &SharedStore<Notification>,
        remote: &Arc<MockRemote>,
        mode: ReadBatchMode,
    ) -> ReadStateReconciler<Notification, MockRemote, NotificationRoutes> {
        ReadStateReconciler::new(Arc::clone(store), Arc::clone(remote), NotificationRoutes, mode)
    }

    #[test]
    fn stats_are_derived_from_records() {
        let store = inbox();
        let stats = ReadStats::compute(store.read().iter().map(|r| &r.fields));
        assert_eq!(stats.total, 4);
        assert_eq!(stats.unread, 3);
        assert_eq!(stats.read, 1);
        assert_eq!(stats.by_type.get("grade"), Some(&1));
        assert_eq!(stats.by_priority.get("high"), Some(&2));
    }

    #[test]
    fn notification_accepts_api_aliases() {
        let n: Notification = serde_json::from_value(json!({
            "id": 9,
            "title": "Trip",
            "type": "event",
            "is_read": true
        }))
        .unwrap();
        assert_eq!(n.kind, "event");
        assert!(n.read);
        assert_eq!(n.priority, "normal");
    }

    #[tokio::test]
    async fn mark_read_confirms_and_updates_stats() {
        let store = inbox();
        let remote = Arc::new(MockRemote::new());
        let reconciler = reconciler(&store, &remote, ReadBatchMode::PerItem);
        let mut stats_rx = reconciler.subscribe();

        reconciler.mark_read(&lid(1)).await.unwrap();

        let record = store.read().get(&lid(1)).cloned().unwrap();
        assert!(record.fields.read);
        assert!(record.fields.read_at.is_some());
        assert_eq!(record.sync_state, SyncState::Clean);
        assert!(stats_rx.has_changed().unwrap());
        assert_eq!(stats_rx.borrow_and_update().unread, 2);
        assert_eq!(remote.calls_to(Method::Post, "/notifications/1/read"), 1);
    }

    #[tokio::test]
    async fn mark_read_failure_rolls_back_record_and_stats() {
        let store = inbox();
        let remote = Arc::new(MockRemote::new());
        remote.fail(Method::Post, "/notifications/2/read", RemoteError::network("offline"));
        let reconciler = reconciler(&store, &remote, ReadBatchMode::PerItem);
        let before = reconciler.stats();

        let err = reconciler.mark_read(&lid(2)).await.unwrap_err();
        assert!(err.is_retryable());

        let record = store.read().get(&lid(2)).cloned().unwrap();
        assert!(!record.fields.read);
        assert_eq!(record.sync_state, SyncState::Error);
        assert_eq!(reconciler.stats(), before);
    }

    #[tokio::test]
    async fn mark_read_of_read_record_makes_no_call() {
        let store = inbox();
        let remote = Arc::new(MockRemote::new());
        let reconciler = reconciler(&store, &remote, ReadBatchMode::PerItem);

        reconciler.mark_read(&lid(4)).await.unwrap();
        assert_eq!(remote.call_count(), 0);
    }

    #[tokio::test]
    async fn mark_all_read_empty_selection_is_noop() {
        let store = inbox();
        let remote = Arc::new(MockRemote::new());
        let reconciler = reconciler(&store, &remote, ReadBatchMode::BulkEndpoint);

        let outcome = reconciler.mark_all_read(&[]).await.unwrap();
        assert!(outcome.is_noop());
        assert_eq!(remote.call_count(), 0);

        let outcome = reconciler.mark_all_read(&[lid(4)]).await.unwrap();
        assert!(outcome.is_noop());
        assert_eq!(remote.call_count(), 0);
    }

    #[tokio::test]
    async fn per_item_rolls_back_only_failures() {
        let store = inbox();
        let remote = Arc::new(MockRemote::new());
        remote.fail(
            Method::Post,
            "/notifications/3/read",
            RemoteError::rejected(500, json!(null)),
        );
        let reconciler = reconciler(&store, &remote, ReadBatchMode::PerItem);

        let outcome = reconciler
            .mark_all_read(&[lid(1), lid(2), lid(3), lid(4)])
            .await
            .unwrap();

        assert_eq!(outcome.failed_ids(), vec![lid(3)]);
        let store = store.read();
        assert!(store.get(&lid(1)).unwrap().fields.read);
        assert!(store.get(&lid(2)).unwrap().fields.read);
        assert!(!store.get(&lid(3)).unwrap().fields.read);
        assert_eq!(reconciler.stats().unread, 1);
        assert_eq!(remote.call_count(), 3);
    }

    #[tokio::test]
    async fn bulk_endpoint_is_all_or_nothing() {
        let store = inbox();
        let remote = Arc::new(MockRemote::new());
        remote.fail(
            Method::Post,
            "/notifications/mark-all-read",
            RemoteError::rejected(500, json!(null)),
        );
        let reconciler = reconciler(&store, &remote, ReadBatchMode::BulkEndpoint);

        let outcome = reconciler.mark_all_read(&[lid(1), lid(2)]).await.unwrap();

        assert_eq!(outcome.failed_ids().len(), 2);
        assert_eq!(remote.call_count(), 1);
        assert_eq!(reconciler.stats().unread, 3);
        assert!(store.read().iter().filter(|r| r.fields.read).count() == 1);
    }

    #[tokio::test]
    async fn bulk_endpoint_sends_one_call() {
        let store = inbox();
        let remote = Arc::new(MockRemote::new());
        let reconciler = reconciler(&store, &remote, ReadBatchMode::BulkEndpoint);

        let outcome = reconciler
            .mark_all_read(&[lid(1), lid(2), lid(3)])
            .await
            .unwrap();

        assert!(outcome.failed_ids().is_empty());
        let calls = remote.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].payload, Some(json!({"ids": [1, 2, 3]})));
        assert_eq!(reconciler.stats().unread, 0);
    }

    #[test]
    fn stats_follow_polled_merges() {
        let store: SharedStore<Notification> = shared_store();
        store
            .write()
            .load(vec![(ServerId::Int(1), Notification::new("Grade posted", "grade", "high"))]);
        let remote = Arc::new(MockRemote::new());
        let reconciler = reconciler(&store, &remote, ReadBatchMode::PerItem);
        let mut stats_rx = reconciler.subscribe();
        assert_eq!(stats_rx.borrow_and_update().unread, 1);

        store.write().merge_remote(vec![
            (ServerId::Int(1), Notification::new("Grade posted", "grade", "high")),
            (ServerId::Int(2), Notification::new("Absent today", "attendance", "normal")),
            (ServerId::Int(3), Notification::new("Invoice due", "payment", "high")),
        ]);

        let stats = reconciler.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.unread, 3);
        assert_eq!(stats.by_priority.get("high"), Some(&2));
        assert!(stats_rx.has_changed().unwrap());
        assert_eq!(*stats_rx.borrow_and_update(), stats);
    }

    #[tokio::test]
    async fn follower_republishes_on_store_changes() {
        let store = inbox();
        let remote = Arc::new(MockRemote::new());
        let liveness = Liveness::new();
        let reconciler =
            reconciler(&store, &remote, ReadBatchMode::PerItem).with_liveness(liveness.clone());
        let mut stats_rx = reconciler.subscribe();
        let follower = reconciler.follow_store();

        store.write().merge_remote(vec![
            (ServerId::Int(1), Notification::new("Grade posted", "grade", "high")),
            (ServerId::Int(2), Notification::new("Absent today", "attendance", "normal")),
            (ServerId::Int(3), Notification::new("Invoice due", "payment", "high")),
            (ServerId::Int(5), Notification::new("Trip", "event", "normal")),
            (ServerId::Int(6), Notification::new("Exam", "grade", "high")),
        ]);

        let seen = tokio::time::timeout(
            Duration::from_secs(5),
            stats_rx.wait_for(|stats| stats.total == 5 && stats.unread == 5),
        )
        .await;
        assert!(matches!(seen, Ok(Ok(_))));

        liveness.kill();
        follower.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn mark_all_read_settles_every_item_after_reload() {
        let store = inbox();
        let remote = Arc::new(MockRemote::new());
        remote.delay(Method::Post, "/notifications/1/read", Duration::from_millis(50));
        remote.delay(Method::Post, "/notifications/2/read", Duration::from_millis(50));
        remote.fail(Method::Post, "/notifications/2/read", RemoteError::Timeout);
        let reconciler = reconciler(&store, &remote, ReadBatchMode::PerItem);

        let ids = [lid(1), lid(2)];
        let (outcome, _) = tokio::join!(reconciler.mark_all_read(&ids), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            store
                .write()
                .load(vec![(ServerId::Int(9), Notification::new("Fresh", "system", "low"))]);
        });

        match outcome.unwrap() {
            MarkAllOutcome::Completed { marked, failed } => {
                assert_eq!(marked, vec![lid(1)]);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].0, lid(2));
            }
            MarkAllOutcome::NothingToDo => panic!("calls were made"),
        }
        assert_eq!(store.read().len(), 1);
        assert_eq!(reconciler.stats().total, 1);
    }

    #[tokio::test]
    async fn result_after_teardown_is_discarded() {
        let store = inbox();
        let remote = Arc::new(MockRemote::new());
        remote.fail(Method::Post, "/notifications/1/read", RemoteError::Timeout);
        let liveness = Liveness::new();
        let reconciler =
            reconciler(&store, &remote, ReadBatchMode::PerItem).with_liveness(liveness.clone());
        liveness.kill();

        let err = reconciler.mark_read(&lid(1)).await.unwrap_err();
        assert_eq!(err, SyncError::Detached);
        // Left as the optimistic state; nobody observes this store anymore.
        assert_eq!(store.read().get(&lid(1)).unwrap().sync_state, SyncState::Pending);
    }
}
