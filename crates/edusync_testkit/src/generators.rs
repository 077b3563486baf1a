//! Property-based test generators using proptest.
//!
//! Provides strategies for rosters, optimistic operation sequences and
//! child-list diffs, plus helpers to replay generated operations against
//! a store.

use crate::fixtures::Student;
use edusync_core::{CollectionStore, InsertPosition, RemoteRecord, ServerId, UndoToken};
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Strategy for server ids of either shape.
pub fn server_id_strategy() -> impl Strategy<Value = ServerId> {
    prop_oneof![
        3 => (1i64..10_000).prop_map(ServerId::Int),
        1 => "[a-f0-9]{8}".prop_map(ServerId::Text),
    ]
}

/// Strategy for display names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{1,8}"
}

/// Strategy for a roster with unique numeric ids.
pub fn roster_strategy(min: usize, max: usize) -> impl Strategy<Value = Vec<(i64, String)>> {
    prop::collection::btree_map(1i64..500, name_strategy(), min..max)
        .prop_map(|rows| rows.into_iter().collect())
}

/// Loads a generated roster into a fresh store.
pub fn load_roster(rows: &[(i64, String)]) -> CollectionStore<Student> {
    let mut store = CollectionStore::new();
    store.load(
        rows.iter()
            .map(|(id, name)| (ServerId::Int(*id), Student::new(name.clone()))),
    );
    store
}

/// One optimistic store operation.
///
/// Indexes are taken modulo the store length when replayed.
#[derive(Debug, Clone)]
pub enum StoreOp {
    /// Rename a record.
    Update {
        /// Record index.
        index: usize,
        /// New name.
        name: String,
    },
    /// Toggle a record's active flag.
    Toggle {
        /// Record index.
        index: usize,
    },
    /// Remove a record.
    Remove {
        /// Record index.
        index: usize,
    },
    /// Insert an unsaved record.
    Insert {
        /// Name of the new record.
        name: String,
        /// Insert at the tail instead of the head.
        at_tail: bool,
    },
}

/// Strategy for optimistic operations.
pub fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        3 => (any::<usize>(), name_strategy())
            .prop_map(|(index, name)| StoreOp::Update { index, name }),
        1 => any::<usize>().prop_map(|index| StoreOp::Toggle { index }),
        2 => any::<usize>().prop_map(|index| StoreOp::Remove { index }),
        2 => (name_strategy(), any::<bool>())
            .prop_map(|(name, at_tail)| StoreOp::Insert { name, at_tail }),
    ]
}

/// Strategy for a sequence of operations.
pub fn op_sequence_strategy(min_ops: usize, max_ops: usize) -> impl Strategy<Value = Vec<StoreOp>> {
    prop::collection::vec(store_op_strategy(), min_ops..max_ops)
}

/// Applies `op` to `store`.
///
/// Returns `None` when the op has no target (empty store) or the store
/// rejected it.
pub fn apply_op(store: &mut CollectionStore<Student>, op: &StoreOp) -> Option<UndoToken<Student>> {
    let local_id_at = |store: &CollectionStore<Student>, index: usize| {
        if store.is_empty() {
            None
        } else {
            Some(store.records()[index % store.len()].local_id.clone())
        }
    };

    match op {
        StoreOp::Update { index, name } => {
            let local_id = local_id_at(store, *index)?;
            store
                .optimistic_update(&local_id, |s| s.name = name.clone())
                .ok()
        }
        StoreOp::Toggle { index } => {
            let local_id = local_id_at(store, *index)?;
            store
                .optimistic_update(&local_id, |s| s.active = !s.active)
                .ok()
        }
        StoreOp::Remove { index } => {
            let local_id = local_id_at(store, *index)?;
            store.optimistic_remove(&local_id).ok()
        }
        StoreOp::Insert { name, at_tail } => {
            let position = if *at_tail {
                InsertPosition::Tail
            } else {
                InsertPosition::Head
            };
            store
                .optimistic_insert(RemoteRecord::unsaved(Student::new(name.clone())), position)
                .ok()
        }
    }
}

/// A generated child-list edit.
#[derive(Debug, Clone)]
pub struct DiffCase {
    /// Server ids present at load time.
    pub original: BTreeSet<i64>,
    /// Server ids present at save time: kept originals plus ids the
    /// baseline never listed.
    pub current: Vec<i64>,
    /// Children added in the editor, without a server id.
    pub new_children: usize,
}

/// Strategy for child-list edits.
pub fn diff_case_strategy() -> impl Strategy<Value = DiffCase> {
    (
        prop::collection::btree_set(1i64..100, 0..10),
        prop::collection::vec(any::<bool>(), 10),
        prop::collection::btree_set(100i64..200, 0..3),
        0usize..4,
    )
        .prop_map(|(original, keep, foreign, new_children)| {
            let current = original
                .iter()
                .zip(keep)
                .filter(|(_, keep)| *keep)
                .map(|(id, _)| *id)
                .chain(foreign)
                .collect();
            DiffCase {
                original,
                current,
                new_children,
            }
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
