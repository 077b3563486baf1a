//! Boundary mapping from server payloads to the canonical record shape.
//!
//! The backend names identity and envelope fields differently per entity
//! (`id`, `_id`, `course_id`, lists wrapped in `data` or `results`). All
//! of that is resolved here so the store only ever sees
//! `(ServerId, T)` pairs.

use crate::error::MappingError;
use crate::id::ServerId;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;

/// Id fields tried when a mapper is built with [`JsonMapper::new`].
pub const DEFAULT_ID_FIELDS: &[&str] = &["id", "_id", "uuid", "pk"];

/// Envelope keys unwrapped when a list response is an object.
pub const DEFAULT_ENVELOPES: &[&str] = &["data", "results", "items"];

/// Maps server payloads into canonical `(ServerId, T)` pairs.
pub trait RecordMapper<T>: Send + Sync {
    /// Version tag of the mapping, bumped whenever the accepted shapes change.
    fn version(&self) -> u32;

    /// Extracts the server identity from a single-record payload.
    fn extract_id(&self, payload: &Value) -> Option<ServerId>;

    /// Maps the domain fields of a single-record payload.
    fn map_fields(&self, payload: &Value) -> Result<T, MappingError>;

    /// Maps a single-record payload that must carry an identity.
    fn map_record(&self, payload: &Value) -> Result<(ServerId, T), MappingError> {
        let id = self
            .extract_id(payload)
            .ok_or_else(|| MappingError::MissingId {
                tried: "record id".into(),
            })?;
        Ok((id, self.map_fields(payload)?))
    }

    /// Maps a list response.
    fn map_list(&self, payload: &Value) -> Result<Vec<(ServerId, T)>, MappingError>;
}

/// JSON mapper driven by serde with configurable field aliases.
#[derive(Debug, Clone)]
pub struct JsonMapper<T> {
    id_fields: Vec<String>,
    envelopes: Vec<String>,
    version: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonMapper<T> {
    /// Creates a mapper using the default id fields and envelopes.
    pub fn new() -> Self {
        Self {
            id_fields: DEFAULT_ID_FIELDS.iter().map(|s| s.to_string()).collect(),
            envelopes: DEFAULT_ENVELOPES.iter().map(|s| s.to_string()).collect(),
            version: 1,
            _marker: PhantomData,
        }
    }

    /// Tries `field` before the default id fields.
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_fields.insert(0, field.into());
        self
    }

    /// Accepts an additional list envelope key.
    pub fn with_envelope(mut self, key: impl Into<String>) -> Self {
        self.envelopes.push(key.into());
        self
    }

    /// Sets the version tag.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    fn unwrap_list<'a>(&self, payload: &'a Value) -> Result<&'a Vec<Value>, MappingError> {
        match payload {
            Value::Array(items) => Ok(items),
            Value::Object(map) => self
                .envelopes
                .iter()
                .find_map(|key| map.get(key).and_then(Value::as_array))
                .ok_or(MappingError::NotAList { found: "object" }),
            other => Err(MappingError::NotAList {
                found: json_type(other),
            }),
        }
    }
}

impl<T> Default for JsonMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> RecordMapper<T> for JsonMapper<T> {
    fn version(&self) -> u32 {
        self.version
    }

    fn extract_id(&self, payload: &Value) -> Option<ServerId> {
        let object = payload.as_object()?;
        self.id_fields
            .iter()
            .find_map(|field| object.get(field).and_then(ServerId::from_json))
    }

    fn map_fields(&self, payload: &Value) -> Result<T, MappingError> {
        T::deserialize(payload).map_err(|e| MappingError::Shape {
            target: std::any::type_name::<T>(),
            message: e.to_string(),
        })
    }

    fn map_record(&self, payload: &Value) -> Result<(ServerId, T), MappingError> {
        let id = self
            .extract_id(payload)
            .ok_or_else(|| MappingError::MissingId {
                tried: self.id_fields.join(", "),
            })?;
        Ok((id, self.map_fields(payload)?))
    }

    fn map_list(&self, payload: &Value) -> Result<Vec<(ServerId, T)>, MappingError> {
        self.unwrap_list(payload)?
            .iter()
            .map(|item| self.map_record(item))
            .collect()
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
