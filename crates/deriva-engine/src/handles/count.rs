//! Count: `records.length`, maintained incrementally.
//!
//! Global counts track a whole record set; property counts track the
//! relation records attached to each host (`+1`/`-1` on the relation's
//! create/delete, keyed by the relation record's host-side id). With a
//! match predicate, updates adjust the count when a record's membership
//! changes; without one, updates are a no-op.

use serde_json::{json, Value};

use deriva_core::computation::Count;
use deriva_core::event::{MutationEvent, MutationKind};
use deriva_core::record::Record;
use deriva_core::schema::RelationSide;
use deriva_storage::{MatchExpr, Modifier, RecordStore};

use crate::deps::DataDep;
use crate::error::ComputationError;
use crate::patch::{ComputeOutcome, ComputeScope, MutationEffect};

use super::{relation_host, ComputationHandle, ValueBinding};

/// Incremental count over one record set.
#[derive(Debug)]
pub struct CountHandle {
    source: String,
    matcher: Option<deriva_core::computation::RecordPredicate>,
    side: Option<RelationSide>,
    binding: ValueBinding,
}

impl CountHandle {
    pub(crate) fn global(key: String, decl: Count) -> Self {
        CountHandle {
            source: decl.record,
            matcher: decl.matcher,
            side: None,
            binding: ValueBinding::Global { key },
        }
    }

    pub(crate) fn property(
        host: String,
        attribute: String,
        decl: Count,
        side: RelationSide,
    ) -> Self {
        CountHandle {
            source: decl.record,
            matcher: decl.matcher,
            side: Some(side),
            binding: ValueBinding::Property {
                record: host,
                attribute,
            },
        }
    }

    fn matches(&self, record: &Record) -> bool {
        self.matcher.as_ref().map_or(true, |m| m.eval(record))
    }
}

/// The event snapshot that exists for create (new) and delete (old).
fn existing_snapshot(event: &MutationEvent) -> Result<&Record, ComputationError> {
    event.current().ok_or_else(|| ComputationError::State {
        reason: format!("event on '{}' carries no record", event.record_name),
    })
}

impl ComputationHandle for CountHandle {
    fn name(&self) -> &'static str {
        "count"
    }

    fn data_deps(&self) -> Vec<DataDep> {
        vec![DataDep::records(self.source.clone())]
    }

    fn default_value(&self) -> Value {
        json!(0)
    }

    fn seed_fields(&self) -> Vec<(String, Value)> {
        self.binding.seed(self.default_value())
    }

    fn compute(
        &self,
        store: &dyn RecordStore,
        scope: &ComputeScope,
    ) -> Result<ComputeOutcome, ComputationError> {
        let records = store.find(&self.source, &MatchExpr::All, &Modifier::none())?;
        let count = records
            .iter()
            .filter(|r| match (self.side, scope) {
                (Some(side), ComputeScope::Record(host)) => {
                    r.record_ref(side.field_name()) == Some(*host)
                }
                _ => true,
            })
            .filter(|r| self.matches(r))
            .count();
        Ok(ComputeOutcome::Patches(vec![
            self.binding.patch(scope, json!(count))?,
        ]))
    }

    fn on_mutation(
        &self,
        store: &dyn RecordStore,
        event: &MutationEvent,
    ) -> Result<MutationEffect, ComputationError> {
        if event.record_name != self.source {
            return Ok(MutationEffect::None);
        }

        let delta: i64 = match event.kind {
            MutationKind::Create => i64::from(self.matches(existing_snapshot(event)?)),
            MutationKind::Delete => -i64::from(self.matches(existing_snapshot(event)?)),
            MutationKind::Update => match &self.matcher {
                // Plain counts ignore updates entirely.
                None => 0,
                Some(matcher) => {
                    let old = event.old_record.as_ref().ok_or_else(|| {
                        ComputationError::State {
                            reason: "update event missing old record".to_string(),
                        }
                    })?;
                    let new = event.record.as_ref().ok_or_else(|| {
                        ComputationError::State {
                            reason: "update event missing new record".to_string(),
                        }
                    })?;
                    i64::from(matcher.eval(new)) - i64::from(matcher.eval(old))
                }
            },
        };

        if delta == 0 {
            return Ok(MutationEffect::None);
        }

        let scope = match self.side {
            Some(side) => ComputeScope::Record(relation_host(event, side)?),
            None => ComputeScope::Global,
        };
        let last = self.binding.current_i64(store, &scope)?;
        Ok(MutationEffect::Patches(vec![
            self.binding.patch(&scope, json!(last + delta))?,
        ]))
    }
}
