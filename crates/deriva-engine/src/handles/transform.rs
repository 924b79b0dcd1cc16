//! Transform: a derived record set projected from a source record set.
//!
//! Each source record maps through a user callback to at most one derived
//! record. Derived records carry a hidden `_source` field holding the
//! originating record id, so update and delete patches key by the
//! original id without an in-memory side table.

use serde_json::{json, Value};

use deriva_core::computation::Transform;
use deriva_core::event::{MutationEvent, MutationKind};
use deriva_core::id::RecordId;
use deriva_core::record::{Fields, Record};
use deriva_storage::{MatchExpr, Modifier, RecordStore};

use crate::deps::DataDep;
use crate::error::ComputationError;
use crate::patch::{ComputeOutcome, ComputeScope, MutationEffect, StatePatch};

use super::ComputationHandle;

/// Hidden field on derived records linking back to the source record.
pub const SOURCE_LINK_FIELD: &str = "_source";

/// Projects source mutations into derived record patches.
#[derive(Debug)]
pub struct TransformHandle {
    source: String,
    derived: String,
    callback: deriva_core::computation::TransformFn,
}

impl TransformHandle {
    pub(crate) fn new(decl: Transform, derived: String) -> Self {
        TransformHandle {
            source: decl.record,
            derived,
            callback: decl.callback,
        }
    }

    fn linked_fields(&self, source_id: RecordId, mut fields: Fields) -> Fields {
        fields.insert(SOURCE_LINK_FIELD.to_string(), json!(source_id.0));
        fields
    }

    /// The derived record produced from `source_id`, if any.
    fn existing(
        &self,
        store: &dyn RecordStore,
        source_id: RecordId,
    ) -> Result<Option<Record>, ComputationError> {
        let mut found = store.find(
            &self.derived,
            &MatchExpr::eq(SOURCE_LINK_FIELD, json!(source_id.0)),
            &Modifier {
                limit: Some(1),
                order_by: None,
            },
        )?;
        Ok(found.pop())
    }
}

impl ComputationHandle for TransformHandle {
    fn name(&self) -> &'static str {
        "transform"
    }

    fn data_deps(&self) -> Vec<DataDep> {
        vec![DataDep::records(self.source.clone())]
    }

    fn default_value(&self) -> Value {
        Value::Null
    }

    fn compute(
        &self,
        store: &dyn RecordStore,
        _scope: &ComputeScope,
    ) -> Result<ComputeOutcome, ComputationError> {
        // From-scratch regeneration assumes an empty derived set.
        let records = store.find(&self.source, &MatchExpr::All, &Modifier::none())?;
        let mut patches = Vec::new();
        for record in &records {
            if let Some(fields) = self.callback.eval(record) {
                patches.push(StatePatch::CreateRecord {
                    record_name: self.derived.clone(),
                    fields: self.linked_fields(record.id, fields),
                });
            }
        }
        Ok(ComputeOutcome::Patches(patches))
    }

    fn on_mutation(
        &self,
        store: &dyn RecordStore,
        event: &MutationEvent,
    ) -> Result<MutationEffect, ComputationError> {
        if event.record_name != self.source {
            return Ok(MutationEffect::None);
        }

        let patch = match event.kind {
            MutationKind::Create => {
                let new = event.record.as_ref().ok_or_else(|| ComputationError::State {
                    reason: "create event missing record".to_string(),
                })?;
                self.callback.eval(new).map(|fields| StatePatch::CreateRecord {
                    record_name: self.derived.clone(),
                    fields: self.linked_fields(new.id, fields),
                })
            }
            MutationKind::Update => {
                let new = event.record.as_ref().ok_or_else(|| ComputationError::State {
                    reason: "update event missing new record".to_string(),
                })?;
                let existing = self.existing(store, new.id)?;
                match (existing, self.callback.eval(new)) {
                    // Rerunning the callback keys the update by the
                    // original id; unchanged output is suppressed at the
                    // storage boundary.
                    (Some(derived), Some(fields)) => Some(StatePatch::UpdateRecord {
                        record_name: self.derived.clone(),
                        id: derived.id,
                        fields: self.linked_fields(new.id, fields),
                    }),
                    (Some(derived), None) => Some(StatePatch::DeleteRecord {
                        record_name: self.derived.clone(),
                        id: derived.id,
                    }),
                    (None, Some(fields)) => Some(StatePatch::CreateRecord {
                        record_name: self.derived.clone(),
                        fields: self.linked_fields(new.id, fields),
                    }),
                    (None, None) => None,
                }
            }
            MutationKind::Delete => {
                let old = event.old_record.as_ref().ok_or_else(|| ComputationError::State {
                    reason: "delete event missing old record".to_string(),
                })?;
                self.existing(store, old.id)?
                    .map(|derived| StatePatch::DeleteRecord {
                        record_name: self.derived.clone(),
                        id: derived.id,
                    })
            }
        };

        Ok(match patch {
            Some(patch) => MutationEffect::Patches(vec![patch]),
            None => MutationEffect::None,
        })
    }
}
