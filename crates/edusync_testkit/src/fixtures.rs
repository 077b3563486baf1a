//! Domain fixtures and store helpers.
//!
//! Typed rows mirror what screens keep in their stores; the `*_json`
//! builders produce the payloads the API serves for them.

use edusync_core::{CollectionStore, LocalId, RemoteRecord, ServerId, SyncState};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A student row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    /// Full name.
    pub name: String,
    /// Whether the account is active.
    #[serde(default)]
    pub active: bool,
}

impl Student {
    /// Creates an inactive student.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: false,
        }
    }
}

/// A group (class) row inside a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Group name.
    pub name: String,
    /// Seat count.
    #[serde(default)]
    pub capacity: u32,
}

impl Group {
    /// Creates a group.
    pub fn new(name: impl Into<String>, capacity: u32) -> Self {
        Self {
            name: name.into(),
            capacity,
        }
    }
}

/// A course row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    /// Course code.
    pub code: String,
    /// Title.
    pub title: String,
}

/// Student payload as served by the API.
pub fn student_json(id: i64, name: &str) -> Value {
    json!({ "id": id, "name": name, "active": false })
}

/// Paginated student list, wrapped the way list endpoints wrap it.
pub fn students_page(rows: &[(i64, &str)]) -> Value {
    let results: Vec<Value> = rows.iter().map(|(id, name)| student_json(*id, name)).collect();
    json!({ "count": results.len(), "results": results })
}

/// Group payload as served by the API.
pub fn group_json(id: i64, name: &str, capacity: u32) -> Value {
    json!({ "id": id, "name": name, "capacity": capacity })
}

/// Course payload with its nested groups.
pub fn course_json(id: i64, code: &str, groups: &[(i64, &str)]) -> Value {
    let groups: Vec<Value> = groups
        .iter()
        .map(|(gid, name)| group_json(*gid, name, 30))
        .collect();
    json!({ "id": id, "code": code, "title": format!("{code} course"), "groups": groups })
}

/// Notification payload as served by the API.
pub fn notification_json(id: i64, title: &str, kind: &str, priority: &str, read: bool) -> Value {
    json!({
        "id": id,
        "title": title,
        "type": kind,
        "priority": priority,
        "is_read": read
    })
}

/// Creates a store loaded with students.
pub fn roster_store(rows: &[(i64, &str)]) -> CollectionStore<Student> {
    let mut store = CollectionStore::new();
    store.load(
        rows.iter()
            .map(|(id, name)| (ServerId::Int(*id), Student::new(*name))),
    );
    store
}

/// Local id of a record loaded with a numeric server id.
pub fn local_id(id: i64) -> LocalId {
    LocalId::for_server(&ServerId::Int(id))
}

/// Full observable state of a store.
///
/// Two snapshots are equal iff values, presence, order and sync states
/// all match.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot<T> {
    /// Records in display order.
    pub records: Vec<RemoteRecord<T>>,
}

impl<T: Clone> StoreSnapshot<T> {
    /// Captures the current state of `store`.
    pub fn capture(store: &CollectionStore<T>) -> Self {
        Self {
            records: store.records().to_vec(),
        }
    }

    /// Returns the local ids in display order.
    pub fn local_ids(&self) -> Vec<LocalId> {
        self.records.iter().map(|r| r.local_id.clone()).collect()
    }

    /// Returns the server ids in display order, skipping unsaved records.
    pub fn server_ids(&self) -> Vec<ServerId> {
        self.records
            .iter()
            .filter_map(|r| r.server_id.clone())
            .collect()
    }

    /// Returns true if every record is `Clean`.
    pub fn all_clean(&self) -> bool {
        self.records.iter().all(|r| r.sync_state == SyncState::Clean)
    }
}
