//! Records: the dynamic, schema-described unit of stored data.
//!
//! A [`Record`] is an id plus an ordered field map. Entities and relations
//! share the representation; relation records additionally carry `source`
//! and `target` fields holding the ids of the two related records.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::RecordId;

/// Ordered field map of a record. `IndexMap` keeps field iteration (and
/// therefore serialization) in insertion order.
pub type Fields = IndexMap<String, Value>;

/// Field name holding a relation record's source-side record id.
pub const SOURCE_FIELD: &str = "source";
/// Field name holding a relation record's target-side record id.
pub const TARGET_FIELD: &str = "target";

/// One stored record: a storage-assigned id plus its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Storage-assigned identity.
    pub id: RecordId,
    /// Field values keyed by property name.
    #[serde(default)]
    pub fields: Fields,
}

impl Record {
    /// Creates a record with no fields.
    pub fn new(id: RecordId) -> Self {
        Record {
            id,
            fields: Fields::new(),
        }
    }

    /// Creates a record from an existing field map.
    pub fn with_fields(id: RecordId, fields: Fields) -> Self {
        Record { id, fields }
    }

    /// Returns a field value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Sets a field value, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Returns a field as `i64` if present and numeric.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.fields.get(name).and_then(Value::as_i64)
    }

    /// Returns a field as `f64`, coercing integer JSON numbers.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(as_f64)
    }

    /// Returns a field as `bool` if present and boolean.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.fields.get(name).and_then(Value::as_bool)
    }

    /// Returns a field as `&str` if present and a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Returns a field interpreted as a record id reference.
    pub fn record_ref(&self, name: &str) -> Option<RecordId> {
        self.get_i64(name).map(RecordId)
    }

    /// The source-side record id, for relation records.
    pub fn source(&self) -> Option<RecordId> {
        self.record_ref(SOURCE_FIELD)
    }

    /// The target-side record id, for relation records.
    pub fn target(&self) -> Option<RecordId> {
        self.record_ref(TARGET_FIELD)
    }
}

/// Coerces a JSON value to `f64`, accepting both integer and float numbers.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
