//! Per-screen binding of a store to a remote collection.
//!
//! A [`Mirror`] owns nothing but the wiring: every mutation follows the
//! same path,
//!
//! ```text
//! optimistic apply ──► mark pending ──► remote call ──┬─► confirm
//!                                                     └─► rollback (+ mark failed)
//! ```
//!
//! and every result is dropped if the screen was torn down while the call
//! was in flight.

use crate::batch::BatchExecutor;
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::remote::{encode_payload, RemoteClient, RemoteRequest};
use crate::session::Liveness;
use edusync_core::{
    shared_store, CollectionStore, InsertPosition, LocalId, RecordMapper, RemoteRecord, ServerId,
    SharedStore, StoreError, UndoToken,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Request builders for one REST collection.
pub trait CollectionRoutes: Send + Sync {
    /// Lists the collection.
    fn list(&self) -> RemoteRequest;

    /// Creates a record.
    fn create(&self, payload: Value) -> RemoteRequest;

    /// Replaces a record.
    fn update(&self, id: &ServerId, payload: Value) -> RemoteRequest;

    /// Deletes a record.
    fn delete(&self, id: &ServerId) -> RemoteRequest;
}

/// Outcome of a bulk mutation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkOutcome {
    /// Records whose mutation the server confirmed.
    pub succeeded: Vec<LocalId>,
    /// Records rolled back or skipped, with the reason.
    pub failed: Vec<(LocalId, SyncError)>,
}

impl BulkOutcome {
    /// Returns true if every record succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    /// Returns the ids of failed records.
    pub fn failed_ids(&self) -> Vec<LocalId> {
        self.failed.iter().map(|(id, _)| id.clone()).collect()
    }
}

/// Binds a [`SharedStore`] to a remote collection.
pub struct Mirror<T, R, M, Q> {
    store: SharedStore<T>,
    remote: Arc<R>,
    mapper: M,
    routes: Q,
    executor: BatchExecutor,
    liveness: Liveness,
}

impl<T, R, M, Q> Mirror<T, R, M, Q>
where
    T: Clone + Serialize + Send + Sync,
    R: RemoteClient,
    M: RecordMapper<T>,
    Q: CollectionRoutes,
{
    /// Creates a mirror over a fresh, empty store.
    pub fn new(remote: Arc<R>, mapper: M, routes: Q) -> Self {
        Self {
            store: shared_store(),
            remote,
            mapper,
            routes,
            executor: BatchExecutor::new(),
            liveness: Liveness::new(),
        }
    }

    /// Uses an existing store.
    pub fn with_store(mut self, store: SharedStore<T>) -> Self {
        self.store = store;
        self
    }

    /// Uses `executor` for bulk mutations.
    pub fn with_executor(mut self, executor: BatchExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Shares a liveness flag, e.g. with the screen's poller.
    pub fn with_liveness(mut self, liveness: Liveness) -> Self {
        self.liveness = liveness;
        self
    }

    /// Returns the shared store.
    pub fn store(&self) -> SharedStore<T> {
        Arc::clone(&self.store)
    }

    /// Returns a snapshot of the records in display order.
    pub fn records(&self) -> Vec<RemoteRecord<T>> {
        self.store.read().records().to_vec()
    }

    /// Returns the liveness flag.
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Returns false once [`teardown`](Self::teardown) was called.
    pub fn is_live(&self) -> bool {
        self.liveness.is_alive()
    }

    /// Stops applying results. Calls in flight settle into nothing.
    pub fn teardown(&self) {
        info!("mirror torn down");
        self.liveness.kill();
    }

    /// Fetches and maps the collection without touching the store.
    pub async fn fetch(&self) -> SyncResult<Vec<(ServerId, T)>> {
        let body = self.remote.call(self.routes.list()).await?;
        let items = self.mapper.map_list(&body).map_err(RemoteError::from)?;
        Ok(items)
    }

    /// Replaces the store contents with the server's list.
    pub async fn refresh(&self) -> SyncResult<usize> {
        let items = self.fetch().await?;
        self.ensure_live()?;
        let count = self.store.write().load(items);
        debug!(count, "mirror refreshed");
        Ok(count)
    }

    /// Merges a polled snapshot, keeping in-flight local changes.
    ///
    /// Returns `None` after teardown.
    pub fn apply_snapshot(&self, items: Vec<(ServerId, T)>) -> Option<usize> {
        if !self.is_live() {
            return None;
        }
        Some(self.store.write().merge_remote(items))
    }

    /// Creates a record, showing it immediately.
    ///
    /// On success the record takes the server's id and fields. On failure
    /// it disappears again.
    pub async fn create(&self, fields: T, position: InsertPosition) -> SyncResult<LocalId> {
        let payload = encode_payload(&fields)?;
        let record = RemoteRecord::unsaved(fields);
        let local_id = record.local_id.clone();

        let token = {
            let mut store = self.store.write();
            let token = store.optimistic_insert(record, position)?;
            store.mark_pending(&local_id)?;
            token
        };

        let result = self.remote.call(self.routes.create(payload)).await;
        self.ensure_live()?;

        let confirmed =
            result.and_then(|body| self.mapper.map_record(&body).map_err(RemoteError::from));
        match confirmed {
            Ok((server_id, fields)) => {
                self.store.write().confirm(&local_id, Some(server_id), fields)?;
                Ok(local_id)
            }
            Err(err) => {
                warn!(local_id = %local_id, error = %err, "create failed; rolled back");
                self.store.write().rollback(&token);
                Err(err.into())
            }
        }
    }

    /// Updates a record in place.
    ///
    /// A `null` response confirms the local fields; otherwise the server's
    /// fields replace them. On failure the previous value is restored and
    /// the record is flagged `Error`.
    pub async fn update<F>(&self, local_id: &LocalId, mutator: F) -> SyncResult<()>
    where
        F: FnOnce(&mut T),
    {
        let (token, request) = {
            let mut store = self.store.write();
            self.stage_update(&mut store, local_id, mutator)?
        };

        let result = self.remote.call(request).await;
        self.ensure_live()?;
        self.settle_update(local_id, &token, result)
    }

    /// Removes a record, restoring it at its position on failure.
    ///
    /// Records the server never saw are removed locally without a call.
    pub async fn remove(&self, local_id: &LocalId) -> SyncResult<()> {
        let (token, server_id) = {
            let mut store = self.store.write();
            let server_id = store.get(local_id).and_then(|r| r.server_id.clone());
            let token = store.optimistic_remove(local_id)?;
            match server_id {
                Some(server_id) => (token, server_id),
                None => {
                    store.commit_removal(&token);
                    return Ok(());
                }
            }
        };

        let result = self.remote.call(self.routes.delete(&server_id)).await;
        self.ensure_live()?;

        let mut store = self.store.write();
        match result {
            Ok(_) => {
                store.commit_removal(&token);
                Ok(())
            }
            Err(err) => {
                warn!(local_id = %local_id, error = %err, "delete failed; restored");
                store.rollback(&token);
                store.mark_failed(local_id);
                Err(err.into())
            }
        }
    }

    /// Removes many records at once.
    ///
    /// Every record disappears immediately; deletes run concurrently and
    /// only the records whose delete failed come back, at their original
    /// positions. Unknown and pending records are reported as failed
    /// without a call.
    pub async fn bulk_remove(&self, ids: &[LocalId]) -> SyncResult<BulkOutcome> {
        let mut outcome = BulkOutcome::default();
        let mut tokens: HashMap<LocalId, UndoToken<T>> = HashMap::new();
        let mut targets: Vec<(LocalId, ServerId)> = Vec::new();

        {
            let mut store = self.store.write();
            for local_id in ids {
                if tokens.contains_key(local_id) {
                    continue;
                }
                let server_id = store.get(local_id).and_then(|r| r.server_id.clone());
                let token = match store.optimistic_remove(local_id) {
                    Ok(token) => token,
                    Err(err) => {
                        outcome.failed.push((local_id.clone(), err.into()));
                        continue;
                    }
                };
                match server_id {
                    Some(server_id) => {
                        tokens.insert(local_id.clone(), token);
                        targets.push((local_id.clone(), server_id));
                    }
                    None => {
                        store.commit_removal(&token);
                        outcome.succeeded.push(local_id.clone());
                    }
                }
            }
        }

        if targets.is_empty() {
            return Ok(outcome);
        }

        let batch = self
            .executor
            .run_all(targets, |(_, server_id)| {
                let request = self.routes.delete(&server_id);
                let remote = Arc::clone(&self.remote);
                async move { remote.call(request).await }
            })
            .await;
        self.ensure_live()?;

        let mut store = self.store.write();
        for ((local_id, _), _) in batch.succeeded {
            if let Some(token) = tokens.get(&local_id) {
                store.commit_removal(token);
            }
            outcome.succeeded.push(local_id);
        }
        // Reverse removal order so each record lands at its old index.
        for ((local_id, _), err) in batch.failed.into_iter().rev() {
            if let Some(token) = tokens.get(&local_id) {
                store.rollback(token);
            }
            store.mark_failed(&local_id);
            outcome.failed.push((local_id, err.into()));
        }

        if !outcome.all_succeeded() {
            warn!(
                succeeded = outcome.succeeded.len(),
                failed = outcome.failed.len(),
                "bulk remove partially rolled back"
            );
        }
        Ok(outcome)
    }

    /// Applies `mutator` to many records at once (bulk activate and the like).
    ///
    /// Updates run concurrently; only failed records are rolled back.
    pub async fn bulk_update<F>(&self, ids: &[LocalId], mutator: F) -> SyncResult<BulkOutcome>
    where
        F: Fn(&mut T),
    {
        let mut outcome = BulkOutcome::default();
        let mut tokens: HashMap<LocalId, UndoToken<T>> = HashMap::new();
        let mut targets: Vec<(LocalId, RemoteRequest)> = Vec::new();

        {
            let mut store = self.store.write();
            for local_id in ids {
                if tokens.contains_key(local_id) {
                    continue;
                }
                match self.stage_update(&mut store, local_id, &mutator) {
                    Ok((token, request)) => {
                        tokens.insert(local_id.clone(), token);
                        targets.push((local_id.clone(), request));
                    }
                    Err(err) => outcome.failed.push((local_id.clone(), err)),
                }
            }
        }

        if targets.is_empty() {
            return Ok(outcome);
        }

        let batch = self
            .executor
            .run_all(targets, |(_, request)| {
                let remote = Arc::clone(&self.remote);
                async move { remote.call(request).await }
            })
            .await;
        self.ensure_live()?;

        for ((local_id, _), body) in batch.succeeded {
            if let Some(token) = tokens.get(&local_id) {
                match self.settle_update(&local_id, token, Ok(body)) {
                    Ok(()) => outcome.succeeded.push(local_id),
                    Err(err) => outcome.failed.push((local_id, err)),
                }
            }
        }
        if !batch.failed.is_empty() {
            let mut store = self.store.write();
            for ((local_id, _), err) in batch.failed {
                if let Some(token) = tokens.get(&local_id) {
                    store.rollback(token);
                }
                store.mark_failed(&local_id);
                outcome.failed.push((local_id, err.into()));
            }
            warn!(
                succeeded = outcome.succeeded.len(),
                failed = outcome.failed.len(),
                "bulk update partially rolled back"
            );
        }
        Ok(outcome)
    }

    fn stage_update<F>(
        &self,
        store: &mut CollectionStore<T>,
        local_id: &LocalId,
        mutator: F,
    ) -> SyncResult<(UndoToken<T>, RemoteRequest)>
    where
        F: FnOnce(&mut T),
    {
        let server_id = persisted_id(store.get(local_id), local_id)?;
        let token = store.optimistic_update(local_id, mutator)?;
        let encoded = store
            .get(local_id)
            .map(|r| encode_payload(&r.fields))
            .unwrap_or(Err(RemoteError::Encode("record vanished".into())));
        match encoded {
            Ok(payload) => {
                store.mark_pending(local_id)?;
                Ok((token, self.routes.update(&server_id, payload)))
            }
            Err(err) => {
                store.rollback(&token);
                Err(err.into())
            }
        }
    }

    fn settle_update(
        &self,
        local_id: &LocalId,
        token: &UndoToken<T>,
        result: Result<Value, RemoteError>,
    ) -> SyncResult<()> {
        let mut store = self.store.write();
        match result {
            Ok(Value::Null) => store.confirm_local(local_id).map_err(SyncError::from),
            Ok(body) => match self.mapper.map_fields(&body) {
                Ok(fields) => store.confirm(local_id, None, fields).map_err(SyncError::from),
                Err(err) => {
                    // Saved, but the echo is unreadable; keep what we sent.
                    warn!(local_id = %local_id, error = %err, "unmappable update response");
                    store.confirm_local(local_id).map_err(SyncError::from)
                }
            },
            Err(err) => {
                warn!(local_id = %local_id, error = %err, "update failed; rolled back");
                store.rollback(token);
                store.mark_failed(local_id);
                Err(err.into())
            }
        }
    }

    fn ensure_live(&self) -> SyncResult<()> {
        if self.liveness.is_alive() {
            Ok(())
        } else {
            debug!("result arrived after teardown; discarded");
            Err(SyncError::Detached)
        }
    }
}

fn persisted_id<T>(record: Option<&RemoteRecord<T>>, local_id: &LocalId) -> SyncResult<ServerId> {
    let record = record.ok_or_else(|| StoreError::UnknownRecord {
        local_id: local_id.clone(),
    })?;
    record.server_id.clone().ok_or_else(|| {
        StoreError::MissingServerId {
            local_id: local_id.clone(),
        }
        .into()
    })
}
