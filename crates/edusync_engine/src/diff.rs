//! Diff-based synchronization of nested child collections.
//!
//! A parent entity (a course) owns a child list (its groups). The editor
//! works on a local copy; on save the copy is compared with the ids the
//! server knew at load time and reconciled with the minimal set of
//! create, update and delete calls.
//!
//! ## Algorithm
//!
//! 1. Partition children into create/update/delete ([`DiffSnapshot::plan`])
//! 2. Run deletes first, tolerating individual failures
//! 3. Run creates and updates concurrently
//! 4. Report every failed child with its operation; the parent counts as
//!    saved regardless

use crate::batch::BatchExecutor;
use crate::error::RemoteError;
use crate::remote::{encode_payload, RemoteClient, RemoteRequest};
use edusync_core::{CollectionStore, LocalId, RecordMapper, ServerId, StoreError};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Server ids of the children present when the parent was loaded.
///
/// Captured once per load and never mutated afterwards, so every save
/// diffs against the same baseline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSnapshot {
    original_ids: BTreeSet<ServerId>,
}

/// A child as edited locally.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildDraft<P> {
    /// Client identity of the child.
    pub local_id: LocalId,
    /// Server identity, absent for children created in the editor.
    pub server_id: Option<ServerId>,
    /// Payload to send.
    pub payload: P,
}

impl<P> ChildDraft<P> {
    /// Creates a draft for a child the server already knows.
    pub fn existing(server_id: ServerId, payload: P) -> Self {
        Self {
            local_id: LocalId::for_server(&server_id),
            server_id: Some(server_id),
            payload,
        }
    }

    /// Creates a draft for a child added in the editor.
    pub fn new(payload: P) -> Self {
        Self {
            local_id: LocalId::generate(),
            server_id: None,
            payload,
        }
    }
}

/// Operations needed to bring the server in line with the local list.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffPlan<P> {
    /// Children without a server id.
    pub to_create: Vec<ChildDraft<P>>,
    /// Children with a server id, paired with it.
    pub to_update: Vec<(ServerId, ChildDraft<P>)>,
    /// Originally present ids no longer in the local list.
    pub to_delete: Vec<ServerId>,
}

impl<P> DiffPlan<P> {
    /// Returns true if the plan issues no calls.
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Returns the number of calls the plan issues.
    pub fn operation_count(&self) -> usize {
        self.to_create.len() + self.to_update.len() + self.to_delete.len()
    }
}

impl DiffSnapshot {
    /// Captures the baseline from the children loaded with the parent.
    pub fn capture<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = ServerId>,
    {
        Self {
            original_ids: ids.into_iter().collect(),
        }
    }

    /// Returns the baseline ids.
    pub fn original_ids(&self) -> &BTreeSet<ServerId> {
        &self.original_ids
    }

    /// Returns true if `id` was present at load time.
    pub fn contains(&self, id: &ServerId) -> bool {
        self.original_ids.contains(id)
    }

    /// Partitions the edited children.
    ///
    /// - No server id: create, whatever its local id looks like
    /// - Server id: update (ids the baseline lacks are updated too, since
    ///   the server already knows them)
    /// - Baseline ids missing from the list: delete
    ///
    /// A server id listed twice is updated once, from its first occurrence.
    pub fn plan<P>(&self, children: Vec<ChildDraft<P>>) -> DiffPlan<P> {
        let mut to_create = Vec::new();
        let mut to_update = Vec::new();
        let mut current = HashSet::new();

        for child in children {
            match child.server_id.clone() {
                None => to_create.push(child),
                Some(id) => {
                    if !current.insert(id.clone()) {
                        warn!(server_id = %id, "child listed twice; keeping first");
                        continue;
                    }
                    if !self.original_ids.contains(&id) {
                        debug!(server_id = %id, "child id not in baseline; updating");
                    }
                    to_update.push((id, child));
                }
            }
        }

        let to_delete = self
            .original_ids
            .iter()
            .filter(|id| !current.contains(*id))
            .cloned()
            .collect();

        DiffPlan {
            to_create,
            to_update,
            to_delete,
        }
    }
}

/// Operation applied to a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildOp {
    /// POST of a new child.
    Create,
    /// PUT of an existing child.
    Update,
    /// DELETE of a removed child.
    Delete,
}

/// A child whose call failed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildError {
    /// Which operation failed.
    pub op: ChildOp,
    /// Local id of the child, for creates and updates.
    pub local_id: Option<LocalId>,
    /// Server id of the child, for updates and deletes.
    pub server_id: Option<ServerId>,
    /// The failure.
    pub error: RemoteError,
}

/// Outcome of a nested sync. Partial success is a normal outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncOutcome {
    /// Created children: local id and server response.
    pub created: Vec<(LocalId, Value)>,
    /// Updated children: server id and server response.
    pub updated: Vec<(ServerId, Value)>,
    /// Server ids deleted.
    pub deleted_ids: Vec<ServerId>,
    /// Every child that failed.
    pub errors: Vec<ChildError>,
}

impl SyncOutcome {
    /// Returns true if no child failed.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the failures of one operation kind.
    pub fn errors_for(&self, op: ChildOp) -> impl Iterator<Item = &ChildError> {
        self.errors.iter().filter(move |e| e.op == op)
    }

    /// Applies the outcome to the editor's child store.
    ///
    /// Created and updated children are confirmed with the server response.
    /// Persisted children whose call failed are flagged `Error`; a child
    /// whose create failed stays `Dirty` so the next save creates it again.
    /// Children absent from the store are skipped. Returns the responses
    /// that could not be applied.
    pub fn apply_to<T, M>(&self, store: &mut CollectionStore<T>, mapper: &M) -> Vec<StoreError>
    where
        T: Clone,
        M: RecordMapper<T>,
    {
        let mut problems = Vec::new();

        for (local_id, response) in &self.created {
            if store.get(local_id).is_none() {
                continue;
            }
            let applied = mapper
                .map_fields(response)
                .map_err(StoreError::from)
                .and_then(|fields| store.confirm(local_id, mapper.extract_id(response), fields));
            if let Err(err) = applied {
                problems.push(err);
            }
        }

        for (server_id, response) in &self.updated {
            let Some(local_id) = store.find_by_server_id(server_id).map(|r| r.local_id.clone())
            else {
                continue;
            };
            let applied = if response.is_null() {
                store.confirm_local(&local_id)
            } else {
                mapper
                    .map_fields(response)
                    .map_err(StoreError::from)
                    .and_then(|fields| store.confirm(&local_id, Some(server_id.clone()), fields))
            };
            if let Err(err) = applied {
                problems.push(err);
            }
        }

        for error in &self.errors {
            if error.op == ChildOp::Create {
                continue;
            }
            if let Some(local_id) = &error.local_id {
                store.mark_failed(local_id);
            }
        }

        problems
    }
}

/// Builds the requests for a child collection.
///
/// URLs stay with the caller; the syncer only decides which calls to make.
pub trait ChildRoutes: Send + Sync {
    /// Request creating a child under `parent`.
    fn create(&self, parent: &ServerId, payload: Value) -> RemoteRequest;
    /// Request replacing child `id` under `parent`.
    fn update(&self, parent: &ServerId, id: &ServerId, payload: Value) -> RemoteRequest;
    /// Request deleting child `id` under `parent`.
    fn delete(&self, parent: &ServerId, id: &ServerId) -> RemoteRequest;
}

/// Reconciles a child collection against its load-time baseline.
pub struct NestedDiffSyncer<R: RemoteClient, C: ChildRoutes> {
    remote: Arc<R>,
    routes: C,
    executor: BatchExecutor,
}

impl<R: RemoteClient, C: ChildRoutes> NestedDiffSyncer<R, C> {
    /// Creates a syncer.
    pub fn new(remote: Arc<R>, routes: C) -> Self {
        Self {
            remote,
            routes,
            executor: BatchExecutor::new(),
        }
    }

    /// Uses a specific executor (e.g. bounded concurrency).
    pub fn with_executor(mut self, executor: BatchExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Syncs `children` of `parent` against `snapshot`.
    pub async fn sync<P: Serialize>(
        &self,
        parent: &ServerId,
        snapshot: &DiffSnapshot,
        children: Vec<ChildDraft<P>>,
    ) -> SyncOutcome {
        let plan = snapshot.plan(children);
        self.execute(parent, plan).await
    }

    /// Executes a precomputed plan.
    pub async fn execute<P: Serialize>(&self, parent: &ServerId, plan: DiffPlan<P>) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        if plan.is_empty() {
            return outcome;
        }
        debug!(
            parent = %parent,
            create = plan.to_create.len(),
            update = plan.to_update.len(),
            delete = plan.to_delete.len(),
            "syncing child collection"
        );

        // Deletes settle before any write so a recreated slot never
        // collides with the sibling it replaces.
        let deletes = self
            .executor
            .run_all(plan.to_delete, |id| {
                let request = self.routes.delete(parent, &id);
                self.remote.call(request)
            })
            .await;
        outcome.deleted_ids = deletes.succeeded.into_iter().map(|(id, _)| id).collect();
        outcome
            .errors
            .extend(deletes.failed.into_iter().map(|(id, error)| ChildError {
                op: ChildOp::Delete,
                local_id: None,
                server_id: Some(id),
                error,
            }));

        let mut create_items = Vec::new();
        for child in plan.to_create {
            match encode_payload(&child.payload) {
                Ok(body) => create_items.push((child.local_id, body)),
                Err(error) => outcome.errors.push(ChildError {
                    op: ChildOp::Create,
                    local_id: Some(child.local_id),
                    server_id: None,
                    error,
                }),
            }
        }
        let mut update_items = Vec::new();
        for (id, child) in plan.to_update {
            match encode_payload(&child.payload) {
                Ok(body) => update_items.push((id, child.local_id, body)),
                Err(error) => outcome.errors.push(ChildError {
                    op: ChildOp::Update,
                    local_id: Some(child.local_id),
                    server_id: Some(id),
                    error,
                }),
            }
        }

        let (created, updated) = futures::join!(
            self.executor.run_all(create_items, |(_, body)| {
                self.remote.call(self.routes.create(parent, body))
            }),
            self.executor.run_all(update_items, |(id, _, body)| {
                self.remote.call(self.routes.update(parent, &id, body))
            }),
        );

        for ((local_id, _), response) in created.succeeded {
            outcome.created.push((local_id, response));
        }
        for ((local_id, _), error) in created.failed {
            outcome.errors.push(ChildError {
                op: ChildOp::Create,
                local_id: Some(local_id),
                server_id: None,
                error,
            });
        }
        for ((id, _, _), response) in updated.succeeded {
            outcome.updated.push((id, response));
        }
        for ((id, local_id, _), error) in updated.failed {
            outcome.errors.push(ChildError {
                op: ChildOp::Update,
                local_id: Some(local_id),
                server_id: Some(id),
                error,
            });
        }

        if !outcome.is_complete() {
            warn!(parent = %parent, failed = outcome.errors.len(), "child sync partially failed");
        }
        outcome
    }
}
