//! SQLite implementation of [`RecordStore`].
//!
//! One `records` table holds every record type; field payloads are JSON
//! text columns. Match expressions are evaluated in memory after an
//! indexed fetch by record type -- SQL compilation of match expressions is
//! deliberately out of scope.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use deriva_core::event::MutationEvent;
use deriva_core::id::RecordId;
use deriva_core::record::{Fields, Record};

use crate::error::StorageError;
use crate::hash::fields_hash;
use crate::query::{apply_modifier, MatchExpr, Modifier};
use crate::schema;
use crate::traits::RecordStore;

/// SQLite-backed store. All semantics match [`crate::InMemoryStore`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) a store at `path`, applying pending migrations.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        Ok(SqliteStore {
            conn: schema::open_database(path)?,
        })
    }

    /// Opens an in-memory store (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        Ok(SqliteStore {
            conn: schema::open_in_memory()?,
        })
    }

    fn ensure_record_type(&self, record_name: &str) -> Result<(), StorageError> {
        if self.has_record_type(record_name) {
            Ok(())
        } else {
            Err(StorageError::UnknownRecordType {
                name: record_name.to_string(),
            })
        }
    }

    fn load(&self, record_name: &str, id: RecordId) -> Result<Option<Record>, StorageError> {
        let row: Option<String> = self
            .conn
            .query_row(
                "SELECT fields FROM records WHERE record_name = ?1 AND id = ?2",
                params![record_name, id.0],
                |row| row.get(0),
            )
            .optional()?;
        match row {
            Some(payload) => {
                let fields: Fields = serde_json::from_str(&payload)?;
                Ok(Some(Record::with_fields(id, fields)))
            }
            None => Ok(None),
        }
    }
}

impl RecordStore for SqliteStore {
    fn install_record_type(&mut self, record_name: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO record_types (name) VALUES (?1)",
            params![record_name],
        )?;
        Ok(())
    }

    fn has_record_type(&self, record_name: &str) -> bool {
        self.conn
            .query_row(
                "SELECT 1 FROM record_types WHERE name = ?1",
                params![record_name],
                |_| Ok(()),
            )
            .optional()
            .map(|row| row.is_some())
            .unwrap_or(false)
    }

    fn create(
        &mut self,
        record_name: &str,
        fields: Fields,
    ) -> Result<(Record, Vec<MutationEvent>), StorageError> {
        self.ensure_record_type(record_name)?;
        let payload = serde_json::to_string(&fields)?;
        self.conn.execute(
            "INSERT INTO records (record_name, fields) VALUES (?1, ?2)",
            params![record_name, payload],
        )?;
        let id = RecordId(self.conn.last_insert_rowid());
        let record = Record::with_fields(id, fields);
        let event = MutationEvent::create(record_name, record.clone());
        Ok((record, vec![event]))
    }

    fn update(
        &mut self,
        record_name: &str,
        id: RecordId,
        fields: Fields,
    ) -> Result<Vec<MutationEvent>, StorageError> {
        self.ensure_record_type(record_name)?;
        let old = self
            .load(record_name, id)?
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
        let payload = serde_json::to_string(&merged.fields)?;
        self.conn.execute(
            "UPDATE records SET fields = ?1 WHERE record_name = ?2 AND id = ?3",
            params![payload, record_name, id.0],
        )?;
        Ok(vec![MutationEvent::update(record_name, old, merged)])
    }

    fn delete(
        &mut self,
        record_name: &str,
        id: RecordId,
    ) -> Result<Vec<MutationEvent>, StorageError> {
        self.ensure_record_type(record_name)?;
        let old = self
            .load(record_name, id)?
            .ok_or_else(|| StorageError::RecordNotFound {
                record_name: record_name.to_string(),
                id: id.0,
            })?;
        self.conn.execute(
            "DELETE FROM records WHERE record_name = ?1 AND id = ?2",
            params![record_name, id.0],
        )?;
        Ok(vec![MutationEvent::delete(record_name, old)])
    }

    fn get(&self, record_name: &str, id: RecordId) -> Result<Option<Record>, StorageError> {
        self.ensure_record_type(record_name)?;
        self.load(record_name, id)
    }

    fn find(
        &self,
        record_name: &str,
        expr: &MatchExpr,
        modifier: &Modifier,
    ) -> Result<Vec<Record>, StorageError> {
        self.ensure_record_type(record_name)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, fields FROM records WHERE record_name = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![record_name], |row| {
            let id: i64 = row.get(0)?;
            let payload: String = row.get(1)?;
            Ok((id, payload))
        })?;

        let mut matched = Vec::new();
        for row in rows {
            let (id, payload) = row?;
            let fields: Fields = serde_json::from_str(&payload)?;
            let record = Record::with_fields(RecordId(id), fields);
            if expr.eval(&record) {
                matched.push(record);
            }
        }
        Ok(apply_modifier(matched, modifier))
    }

    fn record_counts(&self) -> Result<Vec<(String, usize)>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT rt.name, COUNT(r.id) FROM record_types rt \
             LEFT JOIN records r ON r.record_name = rt.name \
             GROUP BY rt.name ORDER BY rt.name ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let name: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((name, count as usize))
        })?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    fn get_state(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let row: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        match row {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    fn set_state(&mut self, key: &str, value: Value) -> Result<(), StorageError> {
        let payload = serde_json::to_string(&value)?;
        self.conn.execute(
            "INSERT INTO state (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, payload],
        )?;
        Ok(())
    }
}
