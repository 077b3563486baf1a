//! Record identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix carried by identities minted on the client for unsaved records.
const LOCAL_PREFIX: &str = "local-";
/// Prefix carried by identities derived from a server id.
const SERVER_PREFIX: &str = "srv-";

/// Stable client-side identity of a mirrored record.
///
/// Local IDs are:
/// - Minted randomly for records created on the client
/// - Derived deterministically from the server id for loaded records,
///   so a reload or a polled snapshot maps onto the same row
/// - Never reassigned once a record exists in a store
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalId(String);

impl LocalId {
    /// Mints a new identity for a record the server has not seen yet.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("{LOCAL_PREFIX}{}", Uuid::new_v4().simple()))
    }

    /// Derives the identity of a record loaded from the server.
    #[must_use]
    pub fn for_server(id: &ServerId) -> Self {
        Self(format!("{SERVER_PREFIX}{id}"))
    }

    /// Wraps an arbitrary string as a local id.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the string form.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this id was minted on the client.
    #[must_use]
    pub fn is_client_minted(&self) -> bool {
        self.0.starts_with(LOCAL_PREFIX)
    }
}

impl fmt::Debug for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalId({})", self.0)
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity assigned by the remote API.
///
/// The backend emits both numeric and string ids depending on the
/// entity, so both are carried verbatim.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerId {
    /// Numeric id (`"id": 42`).
    Int(i64),
    /// String id (`"id": "g1"`, UUIDs, Mongo object ids).
    Text(String),
}

impl ServerId {
    /// Reads a server id from a JSON scalar.
    ///
    /// Returns `None` for nulls, empty strings and non-scalar values.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(ServerId::Int),
            serde_json::Value::String(s) if !s.is_empty() => Some(ServerId::Text(s.clone())),
            _ => None,
        }
    }

    /// Converts to a JSON scalar.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ServerId::Int(n) => serde_json::Value::from(*n),
            ServerId::Text(s) => serde_json::Value::from(s.as_str()),
        }
    }
}

impl From<i64> for ServerId {
    fn from(value: i64) -> Self {
        ServerId::Int(value)
    }
}

impl From<&str> for ServerId {
    fn from(value: &str) -> Self {
        ServerId::Text(value.to_string())
    }
}

impl From<String> for ServerId {
    fn from(value: String) -> Self {
        ServerId::Text(value)
    }
}

impl fmt::Debug for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerId({self})")
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerId::Int(n) => write!(f, "{n}"),
            ServerId::Text(s) => f.write_str(s),
        }
    }
}
