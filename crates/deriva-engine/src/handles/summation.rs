//! Summation and WeightedSummation: `Σ weight(record)` over one or more
//! record sources.
//!
//! Both declarations share one handle; a plain Summation is a weighted
//! summation whose weight is a numeric attribute read. Incrementally, only
//! the weight delta of the single changed record is applied to the last
//! stored sum (`new_weight - old_weight`).

use serde_json::{json, Value};

use deriva_core::computation::{Summation, WeightFn, WeightedSummation};
use deriva_core::event::{MutationEvent, MutationKind};
use deriva_core::record::Record;
use deriva_core::schema::RelationSide;
use deriva_storage::{MatchExpr, Modifier, RecordStore};

use crate::deps::DataDep;
use crate::error::ComputationError;
use crate::patch::{ComputeOutcome, ComputeScope, MutationEffect};

use super::{relation_host, ComputationHandle, ValueBinding};

/// How each record's weight is produced.
#[derive(Debug)]
enum WeightSource {
    /// Read a numeric attribute; missing or non-numeric reads as zero.
    Attribute(String),
    /// User callback.
    Callback(WeightFn),
}

/// Incremental sum over one or more record sets.
#[derive(Debug)]
pub struct SummationHandle {
    sources: Vec<String>,
    weight: WeightSource,
    side: Option<RelationSide>,
    binding: ValueBinding,
}

impl SummationHandle {
    pub(crate) fn attribute_global(key: String, decl: Summation) -> Self {
        SummationHandle {
            sources: vec![decl.record],
            weight: WeightSource::Attribute(decl.attribute),
            side: None,
            binding: ValueBinding::Global { key },
        }
    }

    pub(crate) fn attribute_property(
        host: String,
        attribute: String,
        decl: Summation,
        side: RelationSide,
    ) -> Self {
        SummationHandle {
            sources: vec![decl.record],
            weight: WeightSource::Attribute(decl.attribute),
            side: Some(side),
            binding: ValueBinding::Property {
                record: host,
                attribute,
            },
        }
    }

    pub(crate) fn weighted_global(key: String, decl: WeightedSummation) -> Self {
        SummationHandle {
            sources: decl.records,
            weight: WeightSource::Callback(decl.weight),
            side: None,
            binding: ValueBinding::Global { key },
        }
    }

    pub(crate) fn weighted_property(
        host: String,
        attribute: String,
        decl: WeightedSummation,
        side: RelationSide,
    ) -> Self {
        SummationHandle {
            sources: decl.records,
            weight: WeightSource::Callback(decl.weight),
            side: Some(side),
            binding: ValueBinding::Property {
                record: host,
                attribute,
            },
        }
    }

    fn weight_of(&self, record: &Record) -> f64 {
        match &self.weight {
            WeightSource::Attribute(attribute) => record.get_f64(attribute).unwrap_or(0.0),
            WeightSource::Callback(weight) => weight.eval(record),
        }
    }
}

impl ComputationHandle for SummationHandle {
    fn name(&self) -> &'static str {
        "summation"
    }

    fn data_deps(&self) -> Vec<DataDep> {
        self.sources.iter().map(DataDep::records).collect()
    }

    fn default_value(&self) -> Value {
        json!(0.0)
    }

    fn seed_fields(&self) -> Vec<(String, Value)> {
        self.binding.seed(self.default_value())
    }

    fn compute(
        &self,
        store: &dyn RecordStore,
        scope: &ComputeScope,
    ) -> Result<ComputeOutcome, ComputationError> {
        let mut sum = 0.0;
        for source in &self.sources {
            let records = store.find(source, &MatchExpr::All, &Modifier::none())?;
            sum += records
                .iter()
                .filter(|r| match (self.side, scope) {
                    (Some(side), ComputeScope::Record(host)) => {
                        r.record_ref(side.field_name()) == Some(*host)
                    }
                    _ => true,
                })
                .map(|r| self.weight_of(r))
                .sum::<f64>();
        }
        Ok(ComputeOutcome::Patches(vec![
            self.binding.patch(scope, json!(sum))?,
        ]))
    }

    fn on_mutation(
        &self,
        store: &dyn RecordStore,
        event: &MutationEvent,
    ) -> Result<MutationEffect, ComputationError> {
        if !self.sources.iter().any(|s| s == &event.record_name) {
            return Ok(MutationEffect::None);
        }

        let missing = |side: &str| ComputationError::State {
            reason: format!("update event missing {side} record"),
        };
        let delta = match event.kind {
            MutationKind::Create => {
                let new = event.record.as_ref().ok_or_else(|| missing("new"))?;
                self.weight_of(new)
            }
            MutationKind::Delete => {
                let old = event.old_record.as_ref().ok_or_else(|| missing("old"))?;
                -self.weight_of(old)
            }
            MutationKind::Update => {
                let old = event.old_record.as_ref().ok_or_else(|| missing("old"))?;
                let new = event.record.as_ref().ok_or_else(|| missing("new"))?;
                self.weight_of(new) - self.weight_of(old)
            }
        };

        if delta == 0.0 {
            return Ok(MutationEffect::None);
        }

        let scope = match self.side {
            Some(side) => ComputeScope::Record(relation_host(event, side)?),
            None => ComputeScope::Global,
        };
        let last = self.binding.current_f64(store, &scope)?;
        Ok(MutationEffect::Patches(vec![
            self.binding.patch(&scope, json!(last + delta))?,
        ]))
    }
}
