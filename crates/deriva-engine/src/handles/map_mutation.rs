//! MapRecordMutation: an arbitrary user-supplied mapping from a mutation
//! (plus the prior value) to a new derived value.
//!
//! The strategy delegates entirely to the user callback per mutation. For
//! record-set contexts the patch kind is determined by whether the mapped
//! value already carries an id: with one it updates that derived record,
//! without one it creates a fresh record.

use serde_json::Value;

use deriva_core::computation::{DataContext, MapMutationFn, MapRecordMutation, TargetFn};
use deriva_core::event::MutationEvent;
use deriva_core::id::RecordId;
use deriva_core::record::Fields;
use deriva_storage::RecordStore;

use crate::deps::DataDep;
use crate::error::ComputationError;
use crate::patch::{ComputeOutcome, ComputeScope, MutationEffect, StatePatch};

use super::{ComputationHandle, ValueBinding};

/// Where the mapped value lands.
#[derive(Debug)]
enum MapBinding {
    /// A scalar value (global state or host property).
    Value(ValueBinding),
    /// A derived record set.
    Records { record_name: String },
}

/// User-driven mapping from mutations to derived state.
#[derive(Debug)]
pub struct MapRecordMutationHandle {
    source: String,
    binding: MapBinding,
    map: MapMutationFn,
    compute_target: Option<TargetFn>,
}

impl MapRecordMutationHandle {
    pub(crate) fn new(
        context: &DataContext,
        decl: &MapRecordMutation,
    ) -> Result<Self, ComputationError> {
        let binding = match context {
            DataContext::Global { key } => MapBinding::Value(ValueBinding::Global {
                key: key.clone(),
            }),
            DataContext::Property { host, attribute } => {
                if decl.compute_target.is_none() {
                    return Err(ComputationError::DataDep {
                        reason: format!(
                            "property map '{host}.{attribute}' requires compute_target"
                        ),
                    });
                }
                MapBinding::Value(ValueBinding::Property {
                    record: host.clone(),
                    attribute: attribute.clone(),
                })
            }
            DataContext::Entity { name } | DataContext::Relation { name } => {
                MapBinding::Records {
                    record_name: name.clone(),
                }
            }
        };
        Ok(MapRecordMutationHandle {
            source: decl.record.clone(),
            binding,
            map: decl.map.clone(),
            compute_target: decl.compute_target.clone(),
        })
    }

    /// Splits a mapped object into (existing id, remaining fields).
    fn record_patch(
        &self,
        record_name: &str,
        value: Value,
    ) -> Result<StatePatch, ComputationError> {
        let Value::Object(map) = value else {
            return Err(ComputationError::State {
                reason: format!("mapped record value must be an object, got {value}"),
            });
        };
        let id = map.get("id").and_then(Value::as_i64).map(RecordId);
        let mut fields = Fields::new();
        for (name, value) in map {
            if name != "id" {
                fields.insert(name, value);
            }
        }
        Ok(match id {
            Some(id) => StatePatch::UpdateRecord {
                record_name: record_name.to_string(),
                id,
                fields,
            },
            None => StatePatch::CreateRecord {
                record_name: record_name.to_string(),
                fields,
            },
        })
    }
}

impl ComputationHandle for MapRecordMutationHandle {
    fn name(&self) -> &'static str {
        "map_record_mutation"
    }

    fn data_deps(&self) -> Vec<DataDep> {
        vec![DataDep::records(self.source.clone())]
    }

    fn default_value(&self) -> Value {
        Value::Null
    }

    fn seed_fields(&self) -> Vec<(String, Value)> {
        match &self.binding {
            MapBinding::Value(binding) => binding.seed(Value::Null),
            MapBinding::Records { .. } => Vec::new(),
        }
    }

    fn compute(
        &self,
        _store: &dyn RecordStore,
        scope: &ComputeScope,
    ) -> Result<ComputeOutcome, ComputationError> {
        // Mutation history is not replayable; from scratch is the default.
        Ok(match &self.binding {
            MapBinding::Value(binding) => {
                ComputeOutcome::Patches(vec![binding.patch(scope, Value::Null)?])
            }
            MapBinding::Records { .. } => ComputeOutcome::Patches(Vec::new()),
        })
    }

    fn on_mutation(
        &self,
        store: &dyn RecordStore,
        event: &MutationEvent,
    ) -> Result<MutationEffect, ComputationError> {
        if event.record_name != self.source {
            return Ok(MutationEffect::None);
        }

        let (scope, prior) = match &self.binding {
            MapBinding::Value(binding @ ValueBinding::Global { .. }) => {
                let scope = ComputeScope::Global;
                let prior = binding.current(store, &scope)?;
                (scope, prior)
            }
            MapBinding::Value(binding @ ValueBinding::Property { .. }) => {
                let target = self
                    .compute_target
                    .as_ref()
                    .and_then(|t| t.eval(event));
                let Some(host) = target else {
                    return Ok(MutationEffect::None);
                };
                let scope = ComputeScope::Record(host);
                let prior = binding.current(store, &scope)?;
                (scope, prior)
            }
            MapBinding::Records { .. } => (ComputeScope::Global, None),
        };

        let Some(mapped) = self.map.eval(event, prior.as_ref()) else {
            return Ok(MutationEffect::None);
        };

        let patch = match &self.binding {
            MapBinding::Value(binding) => binding.patch(&scope, mapped)?,
            MapBinding::Records { record_name } => self.record_patch(record_name, mapped)?,
        };
        Ok(MutationEffect::Patches(vec![patch]))
    }
}
