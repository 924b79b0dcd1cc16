pub mod deps;
pub mod error;
pub mod handles;
pub mod index;
pub mod patch;
pub mod scheduler;
pub mod tasks;

// Re-export commonly used types
pub use deps::DataDep;
pub use error::{ComputationError, ConditionError, SchedulerError};
pub use handles::{ComputationHandle, SOURCE_LINK_FIELD};
pub use index::DependencyIndex;
pub use patch::{ComputeOutcome, ComputeScope, MutationEffect, StatePatch};
pub use scheduler::{DispatchSummary, RegisteredComputation, Scheduler, MAX_CASCADE_DEPTH};
pub use tasks::{TaskRecord, STATUS_ERROR, STATUS_PENDING, STATUS_SUCCESS};
