//! State patches: the vocabulary of changes a computation can request.
//!
//! Computations never write storage themselves; they return patches and
//! the scheduler applies them, collecting any mutation events the writes
//! produce for further propagation.

use serde_json::Value;

use deriva_core::id::RecordId;
use deriva_core::record::Fields;

/// The scope a computed value applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeScope {
    /// A global state value.
    Global,
    /// A specific host record.
    Record(RecordId),
}

impl ComputeScope {
    /// The bound record, if any.
    pub fn record(&self) -> Option<RecordId> {
        match self {
            ComputeScope::Global => None,
            ComputeScope::Record(id) => Some(*id),
        }
    }
}

/// One structured state change requested by a computation.
#[derive(Debug, Clone, PartialEq)]
pub enum StatePatch {
    /// Set a global scalar state value.
    SetGlobal { key: String, value: Value },
    /// Set one property of an existing record.
    SetProperty {
        record_name: String,
        id: RecordId,
        attribute: String,
        value: Value,
    },
    /// Create a derived record.
    CreateRecord {
        record_name: String,
        fields: Fields,
    },
    /// Merge fields into a derived record.
    UpdateRecord {
        record_name: String,
        id: RecordId,
        fields: Fields,
    },
    /// Remove a derived record.
    DeleteRecord {
        record_name: String,
        id: RecordId,
    },
}

impl StatePatch {
    /// The record the patch targets, for cycle tracking. Creates and
    /// global writes have no pre-existing target.
    pub fn target(&self) -> Option<RecordId> {
        match self {
            StatePatch::SetGlobal { .. } | StatePatch::CreateRecord { .. } => None,
            StatePatch::SetProperty { id, .. }
            | StatePatch::UpdateRecord { id, .. }
            | StatePatch::DeleteRecord { id, .. } => Some(*id),
        }
    }
}

/// Result of a full (from-scratch) computation.
#[derive(Debug)]
pub enum ComputeOutcome {
    /// The computation resolved synchronously to these patches.
    Patches(Vec<StatePatch>),
    /// The computation must wait for an external actor; the coordinator
    /// persists a pending task record carrying `args`.
    Pending { args: Value },
}

/// Result of offering one mutation event to a computation.
#[derive(Debug)]
pub enum MutationEffect {
    /// The mutation is not relevant.
    None,
    /// Apply these patches.
    Patches(Vec<StatePatch>),
    /// Suspend: persist a pending task for `scope` with `args`.
    Pending { scope: ComputeScope, args: Value },
}
