//! The unified error type for the controller boundary.
//!
//! [`RuntimeError`] wraps every lower-layer error with `From` impls, plus
//! the controller's own failure modes. An interaction call never panics
//! and never half-reports: it returns `{error}` with no silent partial
//! success (already-committed cascade writes remain; rollback is the
//! storage collaborator's transaction boundary).

use thiserror::Error;

use deriva_core::CoreError;
use deriva_engine::SchedulerError;
use deriva_storage::StorageError;

/// Errors produced by the controller.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Schema declaration failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage access failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Computation propagation failed; the cascade was aborted.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// No interaction with the given name or UUID is registered.
    #[error("unknown interaction: '{name}'")]
    UnknownInteraction { name: String },

    /// An interaction with this name is already registered.
    #[error("duplicate interaction: '{name}'")]
    DuplicateInteraction { name: String },

    /// The interaction's condition hook rejected the call.
    #[error("interaction '{interaction}' rejected: {reason}")]
    ConditionRejected {
        interaction: String,
        reason: String,
    },

    /// The interaction's effect callback failed to produce its ops.
    #[error("interaction '{interaction}' effect failed: {reason}")]
    EffectFailed {
        interaction: String,
        reason: String,
    },

    /// `setup(install: false)` found the schema missing from storage.
    #[error("record type '{record}' is not installed; run setup with install")]
    SchemaNotInstalled { record: String },

    /// The controller was used before `setup` completed.
    #[error("controller is not set up")]
    NotSetup,
}
