//! The [`RecordStore`] trait defining the storage contract for records.
//!
//! Two responsibilities meet here:
//! - **CRUD primitives** over dynamically-named record types, plus a
//!   scalar state table for global values.
//! - **Mutation event emission**: every write returns the
//!   [`MutationEvent`]s it produced, synchronously with the write. An
//!   update whose canonical content hash is unchanged emits no event.
//!
//! All backends (InMemoryStore, SqliteStore) implement this trait with
//! identical semantics, ensuring they are fully swappable. The trait is
//! synchronous: mutation batches are processed serially by a single
//! writer, which is the engine's concurrency model.

use serde_json::Value;

use deriva_core::event::MutationEvent;
use deriva_core::id::RecordId;
use deriva_core::record::{Fields, Record};

use crate::error::StorageError;
use crate::query::{MatchExpr, Modifier};

/// The storage contract for records, relation records, and global state.
pub trait RecordStore {
    // -------------------------------------------------------------------
    // Setup
    // -------------------------------------------------------------------

    /// Registers a record type. Writes to unregistered types fail.
    fn install_record_type(&mut self, record_name: &str) -> Result<(), StorageError>;

    /// Returns true if the record type has been installed.
    fn has_record_type(&self, record_name: &str) -> bool;

    // -------------------------------------------------------------------
    // Record CRUD (each call emits the events it caused)
    // -------------------------------------------------------------------

    /// Inserts a record, assigning a fresh id. Returns the stored record
    /// and the create event.
    fn create(
        &mut self,
        record_name: &str,
        fields: Fields,
    ) -> Result<(Record, Vec<MutationEvent>), StorageError>;

    /// Merges `fields` into an existing record. Returns an update event,
    /// or no events when the merged content is unchanged.
    fn update(
        &mut self,
        record_name: &str,
        id: RecordId,
        fields: Fields,
    ) -> Result<Vec<MutationEvent>, StorageError>;

    /// Removes a record. Returns the delete event.
    fn delete(
        &mut self,
        record_name: &str,
        id: RecordId,
    ) -> Result<Vec<MutationEvent>, StorageError>;

    // -------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------

    /// Fetches one record by id.
    fn get(&self, record_name: &str, id: RecordId) -> Result<Option<Record>, StorageError>;

    /// Finds records matching the expression, in ascending id order unless
    /// the modifier orders otherwise.
    fn find(
        &self,
        record_name: &str,
        expr: &MatchExpr,
        modifier: &Modifier,
    ) -> Result<Vec<Record>, StorageError>;

    /// Record counts per installed record type, for inspection.
    fn record_counts(&self) -> Result<Vec<(String, usize)>, StorageError>;

    // -------------------------------------------------------------------
    // Global scalar state
    // -------------------------------------------------------------------

    /// Reads a global state value.
    fn get_state(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Writes a global state value. State writes emit no mutation events;
    /// nothing depends on state keys directly.
    fn set_state(&mut self, key: &str, value: Value) -> Result<(), StorageError>;
}
