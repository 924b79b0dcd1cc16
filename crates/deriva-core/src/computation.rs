//! The computation declaration surface.
//!
//! Each variant of [`Computed`] declares how a property, entity, relation,
//! or global value is derived from other data. Declarations are pure data
//! plus user callbacks; the engine turns them into running computations at
//! controller setup. Dispatch over [`Computed`] is a closed tagged enum
//! matched in one place, not a registry mutated at load time.
//!
//! Callbacks are wrapped in cloneable newtypes with manual `Debug` impls.
//! Declarations are never serialized; schema is declared in code at boot.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{MutationEvent, MutationKind};
use crate::id::RecordId;
use crate::record::{Fields, Record};
use crate::schema::RelationSide;

/// The scope a computation's result is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum DataContext {
    /// A global scalar stored in the state table under `key`.
    Global { key: String },
    /// A derived entity record set.
    Entity { name: String },
    /// A derived relation record set.
    Relation { name: String },
    /// A property on each record of `host`.
    Property { host: String, attribute: String },
}

// ---------------------------------------------------------------------------
// Callback newtypes
// ---------------------------------------------------------------------------

/// Predicate over one record, used by `Count`/`Every`/`Any` match clauses.
#[derive(Clone)]
pub struct RecordPredicate(Arc<dyn Fn(&Record) -> bool + Send + Sync>);

impl RecordPredicate {
    pub fn new(f: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        RecordPredicate(Arc::new(f))
    }

    pub fn eval(&self, record: &Record) -> bool {
        (self.0)(record)
    }
}

impl fmt::Debug for RecordPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordPredicate(..)")
    }
}

/// Maps one record to its weight contribution.
#[derive(Clone)]
pub struct WeightFn(Arc<dyn Fn(&Record) -> f64 + Send + Sync>);

impl WeightFn {
    pub fn new(f: impl Fn(&Record) -> f64 + Send + Sync + 'static) -> Self {
        WeightFn(Arc::new(f))
    }

    pub fn eval(&self, record: &Record) -> f64 {
        (self.0)(record)
    }
}

impl fmt::Debug for WeightFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeightFn(..)")
    }
}

/// Projects a source record into derived record fields, or `None` to
/// produce no derived record.
#[derive(Clone)]
pub struct TransformFn(Arc<dyn Fn(&Record) -> Option<Fields> + Send + Sync>);

impl TransformFn {
    pub fn new(f: impl Fn(&Record) -> Option<Fields> + Send + Sync + 'static) -> Self {
        TransformFn(Arc::new(f))
    }

    pub fn eval(&self, record: &Record) -> Option<Fields> {
        (self.0)(record)
    }
}

impl fmt::Debug for TransformFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransformFn(..)")
    }
}

/// Maps a mutation event (plus the prior value, if any) to a new derived
/// value, or `None` for "not relevant".
#[derive(Clone)]
pub struct MapMutationFn(Arc<dyn Fn(&MutationEvent, Option<&Value>) -> Option<Value> + Send + Sync>);

impl MapMutationFn {
    pub fn new(
        f: impl Fn(&MutationEvent, Option<&Value>) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        MapMutationFn(Arc::new(f))
    }

    pub fn eval(&self, event: &MutationEvent, prior: Option<&Value>) -> Option<Value> {
        (self.0)(event, prior)
    }
}

impl fmt::Debug for MapMutationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MapMutationFn(..)")
    }
}

/// Selects which host record a mutation affects.
#[derive(Clone)]
pub struct TargetFn(Arc<dyn Fn(&MutationEvent) -> Option<RecordId> + Send + Sync>);

impl TargetFn {
    pub fn new(f: impl Fn(&MutationEvent) -> Option<RecordId> + Send + Sync + 'static) -> Self {
        TargetFn(Arc::new(f))
    }

    pub fn eval(&self, event: &MutationEvent) -> Option<RecordId> {
        (self.0)(event)
    }
}

impl fmt::Debug for TargetFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetFn(..)")
    }
}

/// Guard on a state transfer. Errors are surfaced as condition failures,
/// distinct from computation bugs.
#[derive(Clone)]
pub struct ConditionFn(Arc<dyn Fn(&MutationEvent) -> Result<bool, String> + Send + Sync>);

impl ConditionFn {
    pub fn new(f: impl Fn(&MutationEvent) -> Result<bool, String> + Send + Sync + 'static) -> Self {
        ConditionFn(Arc::new(f))
    }

    pub fn eval(&self, event: &MutationEvent) -> Result<bool, String> {
        (self.0)(event)
    }
}

impl fmt::Debug for ConditionFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConditionFn(..)")
    }
}

/// Produces a state value from the host record when a state is entered.
#[derive(Clone)]
pub struct ValueFn(Arc<dyn Fn(&Record) -> Value + Send + Sync>);

impl ValueFn {
    pub fn new(f: impl Fn(&Record) -> Value + Send + Sync + 'static) -> Self {
        ValueFn(Arc::new(f))
    }

    pub fn eval(&self, record: &Record) -> Value {
        (self.0)(record)
    }
}

impl fmt::Debug for ValueFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueFn(..)")
    }
}

/// Factory for a property's pre-computation default value.
#[derive(Clone)]
pub struct DefaultFn(Arc<dyn Fn() -> Value + Send + Sync>);

impl DefaultFn {
    pub fn new(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        DefaultFn(Arc::new(f))
    }

    pub fn eval(&self) -> Value {
        (self.0)()
    }
}

impl fmt::Debug for DefaultFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DefaultFn(..)")
    }
}

/// Extracts the arguments for an externally-resolved computation from a
/// triggering mutation, or `None` when the mutation is not relevant.
#[derive(Clone)]
pub struct CollectArgsFn(Arc<dyn Fn(&MutationEvent) -> Option<Value> + Send + Sync>);

impl CollectArgsFn {
    pub fn new(f: impl Fn(&MutationEvent) -> Option<Value> + Send + Sync + 'static) -> Self {
        CollectArgsFn(Arc::new(f))
    }

    pub fn eval(&self, event: &MutationEvent) -> Option<Value> {
        (self.0)(event)
    }
}

impl fmt::Debug for CollectArgsFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectArgsFn(..)")
    }
}

/// Integrates an externally-produced result (`result`, with the original
/// `args`) into the final computed value.
#[derive(Clone)]
pub struct AsyncReturnFn(Arc<dyn Fn(&Value, &Value) -> Result<Value, String> + Send + Sync>);

impl AsyncReturnFn {
    pub fn new(f: impl Fn(&Value, &Value) -> Result<Value, String> + Send + Sync + 'static) -> Self {
        AsyncReturnFn(Arc::new(f))
    }

    pub fn eval(&self, result: &Value, args: &Value) -> Result<Value, String> {
        (self.0)(result, args)
    }
}

impl fmt::Debug for AsyncReturnFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AsyncReturnFn(..)")
    }
}

// ---------------------------------------------------------------------------
// Strategy declarations
// ---------------------------------------------------------------------------

/// Count of records, or of relation records attached to a host.
#[derive(Debug, Clone)]
pub struct Count {
    /// The counted entity or relation name.
    pub record: String,
    /// For property-scoped counts through a relation: which side of the
    /// relation the host entity occupies.
    pub direction: Option<RelationSide>,
    /// Count only records the predicate accepts.
    pub matcher: Option<RecordPredicate>,
}

impl Count {
    /// Global count over all records of `record`.
    pub fn of(record: impl Into<String>) -> Self {
        Count {
            record: record.into(),
            direction: None,
            matcher: None,
        }
    }

    /// Per-host count of relation records, with the host on `side`.
    pub fn through(relation: impl Into<String>, side: RelationSide) -> Self {
        Count {
            record: relation.into(),
            direction: Some(side),
            matcher: None,
        }
    }

    pub fn with_match(mut self, matcher: RecordPredicate) -> Self {
        self.matcher = Some(matcher);
        self
    }
}

/// Sum of a numeric attribute over a record set.
#[derive(Debug, Clone)]
pub struct Summation {
    pub record: String,
    /// The summed attribute on each record.
    pub attribute: String,
    pub direction: Option<RelationSide>,
}

impl Summation {
    pub fn of(record: impl Into<String>, attribute: impl Into<String>) -> Self {
        Summation {
            record: record.into(),
            attribute: attribute.into(),
            direction: None,
        }
    }

    pub fn through(
        relation: impl Into<String>,
        attribute: impl Into<String>,
        side: RelationSide,
    ) -> Self {
        Summation {
            record: relation.into(),
            attribute: attribute.into(),
            direction: Some(side),
        }
    }
}

/// `Σ weight(record)` across one or more record sources.
#[derive(Debug, Clone)]
pub struct WeightedSummation {
    /// The contributing record names.
    pub records: Vec<String>,
    /// Maps each record to its weight.
    pub weight: WeightFn,
    pub direction: Option<RelationSide>,
}

impl WeightedSummation {
    pub fn over(records: Vec<String>, weight: WeightFn) -> Self {
        WeightedSummation {
            records,
            weight,
            direction: None,
        }
    }

    pub fn through(relation: impl Into<String>, weight: WeightFn, side: RelationSide) -> Self {
        WeightedSummation {
            records: vec![relation.into()],
            weight,
            direction: Some(side),
        }
    }
}

/// True when every record of the set matches the predicate.
#[derive(Debug, Clone)]
pub struct Every {
    pub record: String,
    pub direction: Option<RelationSide>,
    pub matcher: RecordPredicate,
    /// Force `false` when the set is empty (instead of vacuous truth).
    pub not_empty: bool,
}

impl Every {
    pub fn of(record: impl Into<String>, matcher: RecordPredicate) -> Self {
        Every {
            record: record.into(),
            direction: None,
            matcher,
            not_empty: false,
        }
    }

    pub fn through(relation: impl Into<String>, side: RelationSide, matcher: RecordPredicate) -> Self {
        Every {
            record: relation.into(),
            direction: Some(side),
            matcher,
            not_empty: false,
        }
    }

    pub fn not_empty(mut self) -> Self {
        self.not_empty = true;
        self
    }
}

/// True when at least one record of the set matches the predicate.
#[derive(Debug, Clone)]
pub struct Any {
    pub record: String,
    pub direction: Option<RelationSide>,
    pub matcher: RecordPredicate,
}

impl Any {
    pub fn of(record: impl Into<String>, matcher: RecordPredicate) -> Self {
        Any {
            record: record.into(),
            direction: None,
            matcher,
        }
    }

    pub fn through(relation: impl Into<String>, side: RelationSide, matcher: RecordPredicate) -> Self {
        Any {
            record: relation.into(),
            direction: Some(side),
            matcher,
        }
    }
}

/// Derived record set projected from a source record set, one derived
/// record per source record the callback accepts.
#[derive(Debug, Clone)]
pub struct Transform {
    /// The watched source record name.
    pub record: String,
    pub callback: TransformFn,
}

impl Transform {
    pub fn from(record: impl Into<String>, callback: TransformFn) -> Self {
        Transform {
            record: record.into(),
            callback,
        }
    }
}

/// Arbitrary user-supplied mapping from a mutation (plus prior value) to a
/// derived value.
#[derive(Debug, Clone)]
pub struct MapRecordMutation {
    /// The watched source record name.
    pub record: String,
    pub map: MapMutationFn,
    /// Selects the affected host record for property-scoped results.
    pub compute_target: Option<TargetFn>,
}

impl MapRecordMutation {
    pub fn from(record: impl Into<String>, map: MapMutationFn) -> Self {
        MapRecordMutation {
            record: record.into(),
            map,
            compute_target: None,
        }
    }

    pub fn with_target(mut self, target: TargetFn) -> Self {
        self.compute_target = Some(target);
        self
    }
}

/// One named state of a state machine.
#[derive(Debug, Clone)]
pub struct StateNode {
    pub name: String,
    /// When present, the stored property value on entering this state is
    /// computed from the host record instead of the state name.
    pub compute_value: Option<ValueFn>,
}

impl StateNode {
    pub fn named(name: impl Into<String>) -> Self {
        StateNode {
            name: name.into(),
            compute_value: None,
        }
    }

    pub fn with_value(mut self, value: ValueFn) -> Self {
        self.compute_value = Some(value);
        self
    }
}

/// What fires a state transfer.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// A mutation on `record`, optionally restricted by kind and a deep
    /// partial `pattern` matched against the event.
    Record {
        record: String,
        kind: Option<MutationKind>,
        pattern: Option<Value>,
    },
    /// An interaction call, by interaction name.
    Interaction { name: String },
}

/// One declared edge of a state machine.
#[derive(Debug, Clone)]
pub struct StateTransfer {
    /// State the host must currently be in.
    pub current: String,
    /// State entered when the transfer fires.
    pub next: String,
    pub trigger: Trigger,
    /// Selects which host record transitions.
    pub compute_target: TargetFn,
    /// Optional guard; failure aborts the cascade as a condition error.
    pub condition: Option<ConditionFn>,
}

/// A named current-state value per host record, transitioning along
/// declared transfer edges.
#[derive(Debug, Clone)]
pub struct StateMachine {
    pub states: Vec<StateNode>,
    pub transfers: Vec<StateTransfer>,
    pub default_state: String,
}

impl StateMachine {
    pub fn new(
        states: Vec<StateNode>,
        transfers: Vec<StateTransfer>,
        default_state: impl Into<String>,
    ) -> Self {
        StateMachine {
            states,
            transfers,
            default_state: default_state.into(),
        }
    }
}

/// A computation resolved by an external actor: a matching mutation
/// produces a pending task record, and the value arrives later through an
/// explicit async-return call.
#[derive(Debug, Clone)]
pub struct ExternalComputation {
    /// The watched source record name.
    pub record: String,
    pub collect: CollectArgsFn,
    pub on_return: AsyncReturnFn,
    /// Selects the affected host record for property-scoped results.
    pub compute_target: Option<TargetFn>,
}

impl ExternalComputation {
    pub fn from(
        record: impl Into<String>,
        collect: CollectArgsFn,
        on_return: AsyncReturnFn,
    ) -> Self {
        ExternalComputation {
            record: record.into(),
            collect,
            on_return,
            compute_target: None,
        }
    }

    pub fn with_target(mut self, target: TargetFn) -> Self {
        self.compute_target = Some(target);
        self
    }
}

/// The closed set of computation strategies.
#[derive(Debug, Clone)]
pub enum Computed {
    Count(Count),
    Summation(Summation),
    WeightedSummation(WeightedSummation),
    Every(Every),
    Any(Any),
    Transform(Transform),
    StateMachine(StateMachine),
    MapRecordMutation(MapRecordMutation),
    External(ExternalComputation),
}

impl Computed {
    /// Short strategy name for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Computed::Count(_) => "count",
            Computed::Summation(_) => "summation",
            Computed::WeightedSummation(_) => "weighted_summation",
            Computed::Every(_) => "every",
            Computed::Any(_) => "any",
            Computed::Transform(_) => "transform",
            Computed::StateMachine(_) => "state_machine",
            Computed::MapRecordMutation(_) => "map_record_mutation",
            Computed::External(_) => "external",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn predicate_eval() {
        let matcher = RecordPredicate::new(|r| r.get_bool("done") == Some(true));
        let mut rec = Record::new(RecordId(1));
        rec.set("done", json!(true));
        assert!(matcher.eval(&rec));
        rec.set("done", json!(false));
        assert!(!matcher.eval(&rec));
    }

    #[test]
    fn callbacks_are_cloneable_and_debuggable() {
        let weight = WeightFn::new(|r| r.get_f64("amount").unwrap_or(0.0));
        let clone = weight.clone();
        let mut rec = Record::new(RecordId(1));
        rec.set("amount", json!(2.5));
        assert_eq!(clone.eval(&rec), 2.5);
        assert_eq!(format!("{:?}", weight), "WeightFn(..)");
    }

    #[test]
    fn computed_kind_names() {
        let c = Computed::Count(Count::of("Post"));
        assert_eq!(c.kind(), "count");
    }
}
