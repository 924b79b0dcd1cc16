//! Computation strategy implementations.
//!
//! Every strategy implements [`ComputationHandle`]: declare dependencies,
//! compute from scratch, and patch incrementally given one mutation event.
//! Handles are built once at setup by [`build`], which matches over the
//! closed [`Computed`] enum -- a tagged-variant dispatch table, not a
//! registry mutated at load time. Handles are self-contained: each stores
//! the names it needs to build patches, so the scheduler never inspects
//! strategy internals.

use serde_json::Value;

use deriva_core::computation::{Computed, DataContext};
use deriva_core::event::MutationEvent;
use deriva_core::id::RecordId;
use deriva_core::schema::{RelationSide, SchemaRegistry, INTERACTION_RECORD, TASK_RECORD};
use deriva_storage::RecordStore;

use crate::deps::DataDep;
use crate::error::ComputationError;
use crate::patch::{ComputeOutcome, ComputeScope, MutationEffect, StatePatch};

mod count;
mod every_any;
mod external;
mod map_mutation;
mod state_machine;
mod summation;
mod transform;

pub use count::CountHandle;
pub use every_any::{BoolFromCountersHandle, GlobalBoolHandle, RelationCountersHandle};
pub use external::ExternalHandle;
pub use map_mutation::MapRecordMutationHandle;
pub use state_machine::StateMachineHandle;
pub use summation::SummationHandle;
pub use transform::{TransformHandle, SOURCE_LINK_FIELD};

/// The common contract every computation strategy implements.
pub trait ComputationHandle: Send + Sync {
    /// Strategy name for logs and errors.
    fn name(&self) -> &'static str;

    /// Declared data dependencies, consumed by the dependency index.
    fn data_deps(&self) -> Vec<DataDep>;

    /// The value before any data exists.
    fn default_value(&self) -> Value;

    /// Default fields contributed to newly created host records. Empty
    /// for global and derived-record-set computations.
    fn seed_fields(&self) -> Vec<(String, Value)> {
        Vec::new()
    }

    /// Full recomputation from a snapshot of the declared dependencies.
    /// Used at initial creation and as fallback.
    fn compute(
        &self,
        store: &dyn RecordStore,
        scope: &ComputeScope,
    ) -> Result<ComputeOutcome, ComputationError>;

    /// Incremental update given one mutation event and the stored prior
    /// state. Strategies that cannot locate prior state fail loudly.
    fn on_mutation(
        &self,
        store: &dyn RecordStore,
        event: &MutationEvent,
    ) -> Result<MutationEffect, ComputationError>;

    /// Integrates an externally-resolved result into final patches.
    fn async_return(
        &self,
        _result: &Value,
        _args: &Value,
        _scope: &ComputeScope,
    ) -> Result<Vec<StatePatch>, ComputationError> {
        Err(ComputationError::AsyncUnsupported)
    }
}

/// Where a scalar computation's value lives.
#[derive(Debug, Clone)]
pub enum ValueBinding {
    /// A key in the global state table.
    Global { key: String },
    /// A property on each record of `record`.
    Property { record: String, attribute: String },
}

impl ValueBinding {
    /// Builds the patch storing `value` at this binding for `scope`.
    pub fn patch(
        &self,
        scope: &ComputeScope,
        value: Value,
    ) -> Result<StatePatch, ComputationError> {
        match (self, scope) {
            (ValueBinding::Global { key }, ComputeScope::Global) => Ok(StatePatch::SetGlobal {
                key: key.clone(),
                value,
            }),
            (ValueBinding::Property { record, attribute }, ComputeScope::Record(id)) => {
                Ok(StatePatch::SetProperty {
                    record_name: record.clone(),
                    id: *id,
                    attribute: attribute.clone(),
                    value,
                })
            }
            _ => Err(ComputationError::State {
                reason: format!("scope {scope:?} does not match binding {self:?}"),
            }),
        }
    }

    /// Reads the currently stored value at this binding for `scope`.
    pub fn current(
        &self,
        store: &dyn RecordStore,
        scope: &ComputeScope,
    ) -> Result<Option<Value>, ComputationError> {
        match (self, scope) {
            (ValueBinding::Global { key }, ComputeScope::Global) => Ok(store.get_state(key)?),
            (ValueBinding::Property { record, attribute }, ComputeScope::Record(id)) => {
                let host = store.get(record, *id)?.ok_or_else(|| {
                    ComputationError::DataDep {
                        reason: format!("host record {record}[{id}] missing"),
                    }
                })?;
                Ok(host.get(attribute).cloned())
            }
            _ => Err(ComputationError::State {
                reason: format!("scope {scope:?} does not match binding {self:?}"),
            }),
        }
    }

    /// Reads the stored prior value as an integer, failing loudly when it
    /// is absent or of the wrong type.
    pub fn current_i64(
        &self,
        store: &dyn RecordStore,
        scope: &ComputeScope,
    ) -> Result<i64, ComputationError> {
        match self.current(store, scope)? {
            Some(value) => value.as_i64().ok_or_else(|| ComputationError::State {
                reason: format!("prior value at {self:?} is not an integer: {value}"),
            }),
            None => Err(ComputationError::State {
                reason: format!("missing prior value at {self:?}"),
            }),
        }
    }

    /// Seed contribution for new host records: the bound attribute with
    /// its default value. Global bindings seed nothing per-record.
    pub fn seed(&self, default: Value) -> Vec<(String, Value)> {
        match self {
            ValueBinding::Global { .. } => Vec::new(),
            ValueBinding::Property { attribute, .. } => vec![(attribute.clone(), default)],
        }
    }

    /// Reads the stored prior value as a float, failing loudly when it is
    /// absent or of the wrong type.
    pub fn current_f64(
        &self,
        store: &dyn RecordStore,
        scope: &ComputeScope,
    ) -> Result<f64, ComputationError> {
        match self.current(store, scope)? {
            Some(value) => {
                deriva_core::record::as_f64(&value).ok_or_else(|| ComputationError::State {
                    reason: format!("prior value at {self:?} is not a number: {value}"),
                })
            }
            None => Err(ComputationError::State {
                reason: format!("missing prior value at {self:?}"),
            }),
        }
    }
}

/// Returns true when `name` is a declared entity/relation or a built-in
/// record type.
fn record_declared(schema: &SchemaRegistry, name: &str) -> bool {
    schema.entity(name).is_some()
        || schema.relation(name).is_some()
        || name == INTERACTION_RECORD
        || name == TASK_RECORD
}

fn require_record(schema: &SchemaRegistry, name: &str) -> Result<(), ComputationError> {
    if record_declared(schema, name) {
        Ok(())
    } else {
        Err(ComputationError::DataDep {
            reason: format!("computation depends on undeclared record type '{name}'"),
        })
    }
}

/// Checks that `host` sits on `side` of the relation named `relation`.
fn require_host_side(
    schema: &SchemaRegistry,
    relation: &str,
    side: RelationSide,
    host: &str,
) -> Result<(), ComputationError> {
    let rel = schema
        .relation(relation)
        .ok_or_else(|| ComputationError::DataDep {
            reason: format!("'{relation}' is not a declared relation"),
        })?;
    if rel.entity_on(side) != host {
        return Err(ComputationError::DataDep {
            reason: format!(
                "host '{host}' is not the {side:?} entity of relation '{relation}'"
            ),
        });
    }
    Ok(())
}

/// Extracts the host record id from a relation event's given side.
pub(crate) fn relation_host(
    event: &MutationEvent,
    side: RelationSide,
) -> Result<RecordId, ComputationError> {
    event
        .current()
        .and_then(|r| r.record_ref(side.field_name()))
        .ok_or_else(|| ComputationError::DataDep {
            reason: format!(
                "relation event on '{}' lacks a {} id",
                event.record_name,
                side.field_name()
            ),
        })
}

/// Builds the handles a declaration expands to, validated against the
/// schema. Most declarations build one handle; property-scoped Every/Any
/// expand into an auxiliary counter maintainer plus a boolean derivation.
pub fn build(
    context: &DataContext,
    computed: &Computed,
    schema: &SchemaRegistry,
) -> Result<Vec<Box<dyn ComputationHandle>>, ComputationError> {
    let invalid = |reason: String| ComputationError::DataDep { reason };

    match (context, computed) {
        (DataContext::Global { key }, Computed::Count(decl)) => {
            require_record(schema, &decl.record)?;
            if decl.direction.is_some() {
                return Err(invalid("global counts have no relation direction".into()));
            }
            Ok(vec![Box::new(CountHandle::global(key.clone(), decl.clone()))])
        }
        (DataContext::Property { host, attribute }, Computed::Count(decl)) => {
            let side = decl.direction.ok_or_else(|| {
                invalid(format!(
                    "property count '{host}.{attribute}' must name a relation side"
                ))
            })?;
            require_host_side(schema, &decl.record, side, host)?;
            Ok(vec![Box::new(CountHandle::property(
                host.clone(),
                attribute.clone(),
                decl.clone(),
                side,
            ))])
        }
        (DataContext::Global { key }, Computed::Summation(decl)) => {
            require_record(schema, &decl.record)?;
            Ok(vec![Box::new(SummationHandle::attribute_global(
                key.clone(),
                decl.clone(),
            ))])
        }
        (DataContext::Property { host, attribute }, Computed::Summation(decl)) => {
            let side = decl.direction.ok_or_else(|| {
                invalid(format!(
                    "property summation '{host}.{attribute}' must name a relation side"
                ))
            })?;
            require_host_side(schema, &decl.record, side, host)?;
            Ok(vec![Box::new(SummationHandle::attribute_property(
                host.clone(),
                attribute.clone(),
                decl.clone(),
                side,
            ))])
        }
        (DataContext::Global { key }, Computed::WeightedSummation(decl)) => {
            for source in &decl.records {
                require_record(schema, source)?;
            }
            Ok(vec![Box::new(SummationHandle::weighted_global(
                key.clone(),
                decl.clone(),
            ))])
        }
        (DataContext::Property { host, attribute }, Computed::WeightedSummation(decl)) => {
            let side = decl.direction.ok_or_else(|| {
                invalid(format!(
                    "property summation '{host}.{attribute}' must name a relation side"
                ))
            })?;
            for source in &decl.records {
                require_host_side(schema, source, side, host)?;
            }
            Ok(vec![Box::new(SummationHandle::weighted_property(
                host.clone(),
                attribute.clone(),
                decl.clone(),
                side,
            ))])
        }
        (DataContext::Global { key }, Computed::Every(decl)) => {
            require_record(schema, &decl.record)?;
            Ok(vec![Box::new(GlobalBoolHandle::every(key.clone(), decl.clone()))])
        }
        (DataContext::Global { key }, Computed::Any(decl)) => {
            require_record(schema, &decl.record)?;
            Ok(vec![Box::new(GlobalBoolHandle::any(key.clone(), decl.clone()))])
        }
        (DataContext::Property { host, attribute }, Computed::Every(decl)) => {
            let side = decl.direction.ok_or_else(|| {
                invalid(format!(
                    "property every '{host}.{attribute}' must name a relation side"
                ))
            })?;
            require_host_side(schema, &decl.record, side, host)?;
            let (counters, derive) = every_any::expand_every(host, attribute, decl, side);
            Ok(vec![Box::new(counters), Box::new(derive)])
        }
        (DataContext::Property { host, attribute }, Computed::Any(decl)) => {
            let side = decl.direction.ok_or_else(|| {
                invalid(format!(
                    "property any '{host}.{attribute}' must name a relation side"
                ))
            })?;
            require_host_side(schema, &decl.record, side, host)?;
            let (counters, derive) = every_any::expand_any(host, attribute, decl, side);
            Ok(vec![Box::new(counters), Box::new(derive)])
        }
        (DataContext::Entity { name } | DataContext::Relation { name }, Computed::Transform(decl)) => {
            require_record(schema, &decl.record)?;
            require_record(schema, name)?;
            Ok(vec![Box::new(TransformHandle::new(
                decl.clone(),
                name.clone(),
            ))])
        }
        (DataContext::Property { host, attribute }, Computed::StateMachine(decl)) => {
            state_machine::validate(decl)?;
            Ok(vec![Box::new(StateMachineHandle::new(
                host.clone(),
                attribute.clone(),
                decl.clone(),
            ))])
        }
        (context, Computed::MapRecordMutation(decl)) => {
            require_record(schema, &decl.record)?;
            Ok(vec![Box::new(MapRecordMutationHandle::new(
                context, decl,
            )?)])
        }
        (DataContext::Global { key }, Computed::External(decl)) => {
            require_record(schema, &decl.record)?;
            Ok(vec![Box::new(ExternalHandle::global(
                key.clone(),
                decl.clone(),
            ))])
        }
        (DataContext::Property { host, attribute }, Computed::External(decl)) => {
            require_record(schema, &decl.record)?;
            Ok(vec![Box::new(ExternalHandle::property(
                host.clone(),
                attribute.clone(),
                decl.clone(),
            )?)])
        }
        (context, computed) => Err(invalid(format!(
            "strategy '{}' cannot be attached to context {context:?}",
            computed.kind()
        ))),
    }
}
