//! Engine error taxonomy.
//!
//! [`ComputationError`] covers failures inside one computation
//! (missing incremental state, unresolvable dependencies).
//! [`ConditionError`] is distinct: a state-transfer guard failed to
//! evaluate, which is a validation-adjacent failure, not a computation
//! bug. [`SchedulerError`] covers orchestration: cascade overflow, cycle
//! detection, and errors bubbled from computations.
//!
//! Computation errors are never retried; they abort the current cascade
//! and surface to the interaction caller.

use thiserror::Error;

use deriva_core::id::{ComputationId, RecordId};
use deriva_storage::StorageError;

/// A state-transfer guard failed to evaluate.
#[derive(Debug, Error)]
#[error("condition error: {reason}")]
pub struct ConditionError {
    pub reason: String,
}

/// Errors produced inside one computation.
#[derive(Debug, Error)]
pub enum ComputationError {
    /// Incremental state is missing or corrupt. The engine does not guess
    /// recovery; a computation that cannot locate its prior value fails
    /// loudly.
    #[error("computation state error: {reason}")]
    State { reason: String },

    /// A declared data dependency could not be resolved.
    #[error("data dependency unresolvable: {reason}")]
    DataDep { reason: String },

    /// A state-transfer guard failed to evaluate.
    #[error(transparent)]
    Condition(#[from] ConditionError),

    /// Storage access failed while computing.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Async return invoked on a computation without an async path.
    #[error("async return not supported by this computation")]
    AsyncUnsupported,
}

/// Errors produced by the dispatch loop.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A cascade exceeded the depth budget without reaching fixpoint.
    #[error("cascade depth exceeded {max} while propagating '{record_name}'")]
    CascadeOverflow { max: usize, record_name: String },

    /// A computation re-entered itself for the same bound record within
    /// one cascade chain.
    #[error("cycle detected: computation {computation} re-entered for record {record:?}")]
    CycleDetected {
        computation: ComputationId,
        record: Option<RecordId>,
    },

    /// A registered computation id points at nothing.
    #[error("unknown computation: {computation}")]
    UnknownComputation { computation: ComputationId },

    /// An async task record was missing or not in a consumable state.
    #[error("async task {id}: {reason}")]
    Task { id: RecordId, reason: String },

    /// A computation failed; the cascade was aborted.
    #[error(transparent)]
    Computation(#[from] ComputationError),

    /// Storage access failed while applying patches.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
