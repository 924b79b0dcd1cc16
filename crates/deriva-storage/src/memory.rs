//! In-memory implementation of [`RecordStore`].
//!
//! [`InMemoryStore`] is a first-class backend for tests, ephemeral
//! controllers, and anywhere persistence isn't needed. It stores records
//! in per-type `IndexMap`s with identical semantics to the SQLite backend.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;

use deriva_core::event::MutationEvent;
use deriva_core::id::RecordId;
use deriva_core::record::{Fields, Record};

use crate::error::StorageError;
use crate::hash::fields_hash;
use crate::query::{apply_modifier, MatchExpr, Modifier};
use crate::traits::RecordStore;

/// HashMap-backed store. Record ids are assigned from a single counter
/// shared across record types, matching the SQLite backend's single
/// records table.
#[derive(Debug)]
pub struct InMemoryStore {
    /// Records per installed type, in creation order.
    records: HashMap<String, IndexMap<RecordId, Record>>,
    /// Global scalar state.
    state: HashMap<String, Value>,
    /// Next record id to assign.
    next_id: i64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        InMemoryStore::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            records: HashMap::new(),
            state: HashMap::new(),
            next_id: 1,
        }
    }

    fn table(&self, record_name: &str) -> Result<&IndexMap<RecordId, Record>, StorageError> {
        self.records
            .get(record_name)
            .ok_or_else(|| StorageError::UnknownRecordType {
                name: record_name.to_string(),
            })
    }

    fn table_mut(
        &mut self,
        record_name: &str,
    ) -> Result<&mut IndexMap<RecordId, Record>, StorageError> {
        self.records
            .get_mut(record_name)
            .ok_or_else(|| StorageError::UnknownRecordType {
                name: record_name.to_string(),
            })
    }
}

impl RecordStore for InMemoryStore {
    fn install_record_type(&mut self, record_name: &str) -> Result<(), StorageError> {
        self.records
            .entry(record_name.to_string())
            .or_insert_with(IndexMap::new);
        Ok(())
    }

    fn has_record_type(&self, record_name: &str) -> bool {
        self.records.contains_key(record_name)
    }

    fn create(
        &mut self,
        record_name: &str,
        fields: Fields,
    ) -> Result<(Record, Vec<MutationEvent>), StorageError> {
        let id = RecordId(self.next_id);
        let record = Record::with_fields(id, fields);
        self.table_mut(record_name)?.insert(id, record.clone());
        self.next_id += 1;
        let event = MutationEvent::create(record_name, record.clone());
        Ok((record, vec![event]))
    }

    fn update(
        &mut self,
        record_name: &str,
        id: RecordId,
        fields: Fields,
    ) -> Result<Vec<MutationEvent>, StorageError> {
        let table = self.table_mut(record_name)?;
        let old = table
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::RecordNotFound {
                record_name: record_name.to_string(),
                id: id.0,
            })?;

        let mut merged = old.clone();
        for (name, value) in fields {
            merged.set(name, value);
        }
        if fields_hash(&merged.fields) == fields_hash(&old.fields) {
            return Ok(Vec::new());
        }
        table.insert(id, merged.clone());
        Ok(vec![MutationEvent::update(record_name, old, merged)])
    }

    fn delete(
        &mut self,
        record_name: &str,
        id: RecordId,
    ) -> Result<Vec<MutationEvent>, StorageError> {
        let table = self.table_mut(record_name)?;
        let old = table
            .shift_remove(&id)
            .ok_or_else(|| StorageError::RecordNotFound {
                record_name: record_name.to_string(),
                id: id.0,
            })?;
        Ok(vec![MutationEvent::delete(record_name, old)])
    }

    fn get(&self, record_name: &str, id: RecordId) -> Result<Option<Record>, StorageError> {
        Ok(self.table(record_name)?.get(&id).cloned())
    }

    fn find(
        &self,
        record_name: &str,
        expr: &MatchExpr,
        modifier: &Modifier,
    ) -> Result<Vec<Record>, StorageError> {
        let matched: Vec<Record> = self
            .table(record_name)?
            .values()
            .filter(|r| expr.eval(r))
            .cloned()
            .collect();
        Ok(apply_modifier(matched, modifier))
    }

    fn record_counts(&self) -> Result<Vec<(String, usize)>, StorageError> {
        let mut counts: Vec<(String, usize)> = self
            .records
            .iter()
            .map(|(name, table)| (name.clone(), table.len()))
            .collect();
        counts.sort();
        Ok(counts)
    }

    fn get_state(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.state.get(key).cloned())
    }

    fn set_state(&mut self, key: &str, value: Value) -> Result<(), StorageError> {
        self.state.insert(key.to_string(), value);
        Ok(())
    }
}
