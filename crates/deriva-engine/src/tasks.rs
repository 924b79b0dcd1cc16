//! Async task records: the persisted channel between the engine and
//! external actors.
//!
//! A computation that cannot resolve synchronously produces a task record
//! (`status: pending`) in the built-in `_task` record type. The external
//! actor writes `status`/`result` directly through storage, outside the
//! reactive loop. Resolution is an explicit scheduler call -- the engine
//! never polls. A task left pending forever simply leaves the dependent
//! value at its prior state.

use serde_json::{json, Value};

use deriva_core::event::MutationEvent;
use deriva_core::id::{ComputationId, RecordId};
use deriva_core::record::{Fields, Record};
use deriva_core::schema::TASK_RECORD;
use deriva_storage::{MatchExpr, Modifier, RecordStore, StorageError};

use crate::error::ComputationError;
use crate::patch::ComputeScope;

/// Task awaiting external resolution.
pub const STATUS_PENDING: &str = "pending";
/// Task resolved successfully; `result` carries the payload.
pub const STATUS_SUCCESS: &str = "success";
/// Task failed externally; `result` carries the error payload.
pub const STATUS_ERROR: &str = "error";

/// A parsed `_task` record.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: RecordId,
    pub computation: ComputationId,
    pub scope: ComputeScope,
    pub status: String,
    pub args: Value,
    pub result: Value,
}

/// Persists a pending task for `computation` at `scope`.
pub fn create_task(
    store: &mut dyn RecordStore,
    computation: ComputationId,
    scope: &ComputeScope,
    args: Value,
) -> Result<(Record, Vec<MutationEvent>), StorageError> {
    let mut fields = Fields::new();
    fields.insert("status".to_string(), json!(STATUS_PENDING));
    fields.insert("computation".to_string(), json!(computation.0));
    fields.insert(
        "host".to_string(),
        match scope.record() {
            Some(id) => json!(id.0),
            None => Value::Null,
        },
    );
    fields.insert("args".to_string(), args);
    fields.insert("result".to_string(), Value::Null);
    store.create(TASK_RECORD, fields)
}

/// Parses a stored `_task` record, failing loudly on corrupt shape.
pub fn parse_task(record: &Record) -> Result<TaskRecord, ComputationError> {
    let computation = record
        .get_i64("computation")
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| ComputationError::State {
            reason: format!("task {} has no computation id", record.id),
        })?;
    let status = record
        .get_str("status")
        .ok_or_else(|| ComputationError::State {
            reason: format!("task {} has no status", record.id),
        })?
        .to_string();
    let scope = match record.get_i64("host") {
        Some(host) => ComputeScope::Record(RecordId(host)),
        None => ComputeScope::Global,
    };
    Ok(TaskRecord {
        id: record.id,
        computation: ComputationId(computation),
        scope,
        status,
        args: record.get("args").cloned().unwrap_or(Value::Null),
        result: record.get("result").cloned().unwrap_or(Value::Null),
    })
}

/// All tasks still awaiting external resolution.
pub fn pending_tasks(store: &dyn RecordStore) -> Result<Vec<Record>, StorageError> {
    store.find(
        TASK_RECORD,
        &MatchExpr::eq("status", json!(STATUS_PENDING)),
        &Modifier::none(),
    )
}
