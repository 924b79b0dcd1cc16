pub mod computation;
pub mod error;
pub mod event;
pub mod id;
pub mod record;
pub mod schema;

// Re-export commonly used types
pub use computation::{
    Any, AsyncReturnFn, CollectArgsFn, Computed, ConditionFn, Count, DataContext, DefaultFn,
    Every, ExternalComputation, MapMutationFn, MapRecordMutation, RecordPredicate, StateMachine,
    StateNode, StateTransfer, Summation, TargetFn, Transform, TransformFn, Trigger, ValueFn,
    WeightFn, WeightedSummation,
};
pub use error::CoreError;
pub use event::{MutationEvent, MutationKind};
pub use id::{ComputationId, RecordId};
pub use record::{Fields, Record};
pub use schema::{
    Cardinality, Entity, GlobalItem, Property, PropertyType, Relation, RelationSide,
    SchemaRegistry, INTERACTION_RECORD, TASK_RECORD,
};
