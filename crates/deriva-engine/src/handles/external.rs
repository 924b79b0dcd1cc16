//! ExternalComputation: a computation resolved by an external actor.
//!
//! A matching mutation yields a pending effect; the scheduler's task
//! coordinator persists it as a task record. The value arrives later
//! through an explicit async-return call, which lands as an ordinary
//! state patch. No timeout or retry exists: an unresolved task leaves the
//! bound value at its prior state indefinitely.

use serde_json::Value;

use deriva_core::computation::{AsyncReturnFn, CollectArgsFn, ExternalComputation, TargetFn};
use deriva_core::event::MutationEvent;
use deriva_storage::RecordStore;

use crate::deps::DataDep;
use crate::error::ComputationError;
use crate::patch::{ComputeOutcome, ComputeScope, MutationEffect, StatePatch};

use super::{ComputationHandle, ValueBinding};

/// Externally-resolved computation bound to a global key or host property.
#[derive(Debug)]
pub struct ExternalHandle {
    source: String,
    binding: ValueBinding,
    collect: CollectArgsFn,
    on_return: AsyncReturnFn,
    compute_target: Option<TargetFn>,
}

impl ExternalHandle {
    pub(crate) fn global(key: String, decl: ExternalComputation) -> Self {
        ExternalHandle {
            source: decl.record,
            binding: ValueBinding::Global { key },
            collect: decl.collect,
            on_return: decl.on_return,
            compute_target: decl.compute_target,
        }
    }

    pub(crate) fn property(
        host: String,
        attribute: String,
        decl: ExternalComputation,
    ) -> Result<Self, ComputationError> {
        if decl.compute_target.is_none() {
            return Err(ComputationError::DataDep {
                reason: format!(
                    "property external computation '{host}.{attribute}' requires compute_target"
                ),
            });
        }
        Ok(ExternalHandle {
            source: decl.record,
            binding: ValueBinding::Property {
                record: host,
                attribute,
            },
            collect: decl.collect,
            on_return: decl.on_return,
            compute_target: decl.compute_target,
        })
    }
}

impl ComputationHandle for ExternalHandle {
    fn name(&self) -> &'static str {
        "external"
    }

    fn data_deps(&self) -> Vec<DataDep> {
        vec![DataDep::records(self.source.clone())]
    }

    fn default_value(&self) -> Value {
        Value::Null
    }

    fn seed_fields(&self) -> Vec<(String, Value)> {
        self.binding.seed(Value::Null)
    }

    fn compute(
        &self,
        _store: &dyn RecordStore,
        _scope: &ComputeScope,
    ) -> Result<ComputeOutcome, ComputationError> {
        // Cannot resolve synchronously; signal the coordinator.
        Ok(ComputeOutcome::Pending { args: Value::Null })
    }

    fn on_mutation(
        &self,
        _store: &dyn RecordStore,
        event: &MutationEvent,
    ) -> Result<MutationEffect, ComputationError> {
        if event.record_name != self.source {
            return Ok(MutationEffect::None);
        }
        let scope = match &self.binding {
            ValueBinding::Global { .. } => ComputeScope::Global,
            ValueBinding::Property { .. } => {
                let target = self.compute_target.as_ref().and_then(|t| t.eval(event));
                match target {
                    Some(host) => ComputeScope::Record(host),
                    None => return Ok(MutationEffect::None),
                }
            }
        };
        match self.collect.eval(event) {
            Some(args) => Ok(MutationEffect::Pending { scope, args }),
            None => Ok(MutationEffect::None),
        }
    }

    fn async_return(
        &self,
        result: &Value,
        args: &Value,
        scope: &ComputeScope,
    ) -> Result<Vec<StatePatch>, ComputationError> {
        let value = self
            .on_return
            .eval(result, args)
            .map_err(|reason| ComputationError::State { reason })?;
        Ok(vec![self.binding.patch(scope, value)?])
    }
}
