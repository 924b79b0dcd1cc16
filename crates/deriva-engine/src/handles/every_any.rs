//! Every and Any: booleans over a match predicate across a record set.
//!
//! Implemented by maintaining two auxiliary counts -- `matchCount` and
//! `totalCount` -- and deriving the boolean as `match == total` (Every) or
//! `match > 0` (Any).
//!
//! Property-scoped declarations expand into TWO registered computations:
//!
//! 1. [`RelationCountersHandle`] maintains hidden `_<attr>_match_count` /
//!    `_<attr>_total_count` fields on the host record from relation
//!    events.
//! 2. [`BoolFromCountersHandle`] depends only on those two host
//!    attributes and derives the boolean when either count changes.
//!
//! The boolean therefore recomputes only when an auxiliary count actually
//! changes on the host record, and the cascade step between the two is an
//! ordinary mutation event.
//!
//! Global declarations keep both counts in state keys and derive the
//! boolean in one step, since state writes emit no events to chain on.

use serde_json::{json, Value};

use deriva_core::computation::{Any, Every, RecordPredicate};
use deriva_core::event::{MutationEvent, MutationKind};
use deriva_core::id::RecordId;
use deriva_core::record::{Fields, Record};
use deriva_core::schema::RelationSide;
use deriva_storage::{MatchExpr, Modifier, RecordStore};

use crate::deps::DataDep;
use crate::error::ComputationError;
use crate::patch::{ComputeOutcome, ComputeScope, MutationEffect, StatePatch};

use super::{relation_host, ComputationHandle};

/// Hidden match-count field name for a boolean attribute.
pub(crate) fn match_attr(attribute: &str) -> String {
    format!("_{attribute}_match_count")
}

/// Hidden total-count field name for a boolean attribute.
pub(crate) fn total_attr(attribute: &str) -> String {
    format!("_{attribute}_total_count")
}

/// Which boolean the counters derive.
#[derive(Debug, Clone, Copy)]
pub enum BoolMode {
    Every { not_empty: bool },
    Any,
}

impl BoolMode {
    fn eval(self, matched: i64, total: i64) -> bool {
        match self {
            BoolMode::Every { not_empty } => {
                if total == 0 {
                    !not_empty
                } else {
                    matched == total
                }
            }
            BoolMode::Any => matched > 0,
        }
    }

    fn default_value(self) -> bool {
        self.eval(0, 0)
    }
}

/// Counts matching/total relation records per host via the two hidden
/// count fields.
#[derive(Debug)]
pub struct RelationCountersHandle {
    relation: String,
    side: RelationSide,
    host_record: String,
    matcher: RecordPredicate,
    match_attr: String,
    total_attr: String,
}

/// Derives the boolean property from the two hidden count fields.
#[derive(Debug)]
pub struct BoolFromCountersHandle {
    host_record: String,
    attribute: String,
    mode: BoolMode,
    match_attr: String,
    total_attr: String,
}

/// Expands a property-scoped Every into its two computations.
pub(crate) fn expand_every(
    host: &str,
    attribute: &str,
    decl: &Every,
    side: RelationSide,
) -> (RelationCountersHandle, BoolFromCountersHandle) {
    expand(
        host,
        attribute,
        &decl.record,
        decl.matcher.clone(),
        BoolMode::Every {
            not_empty: decl.not_empty,
        },
        side,
    )
}

/// Expands a property-scoped Any into its two computations.
pub(crate) fn expand_any(
    host: &str,
    attribute: &str,
    decl: &Any,
    side: RelationSide,
) -> (RelationCountersHandle, BoolFromCountersHandle) {
    expand(host, attribute, &decl.record, decl.matcher.clone(), BoolMode::Any, side)
}

fn expand(
    host: &str,
    attribute: &str,
    relation: &str,
    matcher: RecordPredicate,
    mode: BoolMode,
    side: RelationSide,
) -> (RelationCountersHandle, BoolFromCountersHandle) {
    let counters = RelationCountersHandle {
        relation: relation.to_string(),
        side,
        host_record: host.to_string(),
        matcher,
        match_attr: match_attr(attribute),
        total_attr: total_attr(attribute),
    };
    let derive = BoolFromCountersHandle {
        host_record: host.to_string(),
        attribute: attribute.to_string(),
        mode,
        match_attr: match_attr(attribute),
        total_attr: total_attr(attribute),
    };
    (counters, derive)
}

impl RelationCountersHandle {
    fn host_counts(
        &self,
        store: &dyn RecordStore,
        host: RecordId,
    ) -> Result<(i64, i64), ComputationError> {
        let record = store.get(&self.host_record, host)?.ok_or_else(|| {
            ComputationError::DataDep {
                reason: format!("host record {}[{host}] missing", self.host_record),
            }
        })?;
        let read = |attr: &str| {
            record.get_i64(attr).ok_or_else(|| ComputationError::State {
                reason: format!(
                    "missing count field '{attr}' on {}[{host}]",
                    self.host_record
                ),
            })
        };
        Ok((read(&self.match_attr)?, read(&self.total_attr)?))
    }

    fn counts_patch(&self, host: RecordId, matched: i64, total: i64) -> StatePatch {
        let mut fields = Fields::new();
        fields.insert(self.match_attr.clone(), json!(matched));
        fields.insert(self.total_attr.clone(), json!(total));
        StatePatch::UpdateRecord {
            record_name: self.host_record.clone(),
            id: host,
            fields,
        }
    }
}

impl ComputationHandle for RelationCountersHandle {
    fn name(&self) -> &'static str {
        "relation_counters"
    }

    fn data_deps(&self) -> Vec<DataDep> {
        vec![DataDep::records(self.relation.clone())]
    }

    fn default_value(&self) -> Value {
        json!({ "match": 0, "total": 0 })
    }

    fn seed_fields(&self) -> Vec<(String, Value)> {
        vec![
            (self.match_attr.clone(), json!(0)),
            (self.total_attr.clone(), json!(0)),
        ]
    }

    fn compute(
        &self,
        store: &dyn RecordStore,
        scope: &ComputeScope,
    ) -> Result<ComputeOutcome, ComputationError> {
        let ComputeScope::Record(host) = scope else {
            return Err(ComputationError::State {
                reason: "relation counters are host-scoped".to_string(),
            });
        };
        let records = store.find(&self.relation, &MatchExpr::All, &Modifier::none())?;
        let mine: Vec<&Record> = records
            .iter()
            .filter(|r| r.record_ref(self.side.field_name()) == Some(*host))
            .collect();
        let total = mine.len() as i64;
        let matched = mine.iter().filter(|r| self.matcher.eval(r)).count() as i64;
        Ok(ComputeOutcome::Patches(vec![
            self.counts_patch(*host, matched, total),
        ]))
    }

    fn on_mutation(
        &self,
        store: &dyn RecordStore,
        event: &MutationEvent,
    ) -> Result<MutationEffect, ComputationError> {
        if event.record_name != self.relation {
            return Ok(MutationEffect::None);
        }

        let missing = |side: &str| ComputationError::State {
            reason: format!("update event missing {side} record"),
        };
        let (match_delta, total_delta) = match event.kind {
            MutationKind::Create => {
                let new = event.record.as_ref().ok_or_else(|| missing("new"))?;
                (i64::from(self.matcher.eval(new)), 1)
            }
            MutationKind::Delete => {
                let old = event.old_record.as_ref().ok_or_else(|| missing("old"))?;
                (-i64::from(self.matcher.eval(old)), -1)
            }
            MutationKind::Update => {
                let old = event.old_record.as_ref().ok_or_else(|| missing("old"))?;
                let new = event.record.as_ref().ok_or_else(|| missing("new"))?;
                (
                    i64::from(self.matcher.eval(new)) - i64::from(self.matcher.eval(old)),
                    0,
                )
            }
        };

        if match_delta == 0 && total_delta == 0 {
            return Ok(MutationEffect::None);
        }

        let host = relation_host(event, self.side)?;
        let (matched, total) = self.host_counts(store, host)?;
        Ok(MutationEffect::Patches(vec![self.counts_patch(
            host,
            matched + match_delta,
            total + total_delta,
        )]))
    }
}

impl ComputationHandle for BoolFromCountersHandle {
    fn name(&self) -> &'static str {
        "bool_from_counters"
    }

    fn data_deps(&self) -> Vec<DataDep> {
        vec![DataDep::property(
            self.host_record.clone(),
            vec![self.match_attr.clone(), self.total_attr.clone()],
        )]
    }

    fn default_value(&self) -> Value {
        json!(self.mode.default_value())
    }

    fn seed_fields(&self) -> Vec<(String, Value)> {
        vec![(self.attribute.clone(), self.default_value())]
    }

    fn compute(
        &self,
        store: &dyn RecordStore,
        scope: &ComputeScope,
    ) -> Result<ComputeOutcome, ComputationError> {
        let ComputeScope::Record(host) = scope else {
            return Err(ComputationError::State {
                reason: "boolean derivation is host-scoped".to_string(),
            });
        };
        let record = store.get(&self.host_record, *host)?.ok_or_else(|| {
            ComputationError::DataDep {
                reason: format!("host record {}[{host}] missing", self.host_record),
            }
        })?;
        let value = self.derive(&record, *host)?;
        Ok(ComputeOutcome::Patches(vec![StatePatch::SetProperty {
            record_name: self.host_record.clone(),
            id: *host,
            attribute: self.attribute.clone(),
            value,
        }]))
    }

    fn on_mutation(
        &self,
        _store: &dyn RecordStore,
        event: &MutationEvent,
    ) -> Result<MutationEffect, ComputationError> {
        // The dependency index only routes host updates touching the
        // count fields here.
        if event.record_name != self.host_record || event.kind != MutationKind::Update {
            return Ok(MutationEffect::None);
        }
        let new = event.record.as_ref().ok_or_else(|| ComputationError::State {
            reason: "update event missing new record".to_string(),
        })?;
        let value = self.derive(new, new.id)?;
        Ok(MutationEffect::Patches(vec![StatePatch::SetProperty {
            record_name: self.host_record.clone(),
            id: new.id,
            attribute: self.attribute.clone(),
            value,
        }]))
    }
}

impl BoolFromCountersHandle {
    fn derive(&self, host: &Record, id: RecordId) -> Result<Value, ComputationError> {
        let read = |attr: &str| {
            host.get_i64(attr).ok_or_else(|| ComputationError::State {
                reason: format!("missing count field '{attr}' on {}[{id}]", self.host_record),
            })
        };
        let matched = read(&self.match_attr)?;
        let total = read(&self.total_attr)?;
        Ok(json!(self.mode.eval(matched, total)))
    }
}

/// Global Every/Any: counts live in state keys and the boolean derives in
/// the same step.
#[derive(Debug)]
pub struct GlobalBoolHandle {
    source: String,
    matcher: RecordPredicate,
    mode: BoolMode,
    key: String,
    match_key: String,
    total_key: String,
}

impl GlobalBoolHandle {
    pub(crate) fn every(key: String, decl: Every) -> Self {
        GlobalBoolHandle {
            source: decl.record,
            matcher: decl.matcher,
            mode: BoolMode::Every {
                not_empty: decl.not_empty,
            },
            match_key: match_attr(&key),
            total_key: total_attr(&key),
            key,
        }
    }

    pub(crate) fn any(key: String, decl: Any) -> Self {
        GlobalBoolHandle {
            source: decl.record,
            matcher: decl.matcher,
            mode: BoolMode::Any,
            match_key: match_attr(&key),
            total_key: total_attr(&key),
            key,
        }
    }

    fn state_i64(&self, store: &dyn RecordStore, key: &str) -> Result<i64, ComputationError> {
        match store.get_state(key)? {
            Some(value) => value.as_i64().ok_or_else(|| ComputationError::State {
                reason: format!("state '{key}' is not an integer"),
            }),
            None => Err(ComputationError::State {
                reason: format!("missing state '{key}'"),
            }),
        }
    }

    fn patches(&self, matched: i64, total: i64) -> Vec<StatePatch> {
        vec![
            StatePatch::SetGlobal {
                key: self.match_key.clone(),
                value: json!(matched),
            },
            StatePatch::SetGlobal {
                key: self.total_key.clone(),
                value: json!(total),
            },
            StatePatch::SetGlobal {
                key: self.key.clone(),
                value: json!(self.mode.eval(matched, total)),
            },
        ]
    }
}

impl ComputationHandle for GlobalBoolHandle {
    fn name(&self) -> &'static str {
        "global_bool"
    }

    fn data_deps(&self) -> Vec<DataDep> {
        vec![DataDep::records(self.source.clone())]
    }

    fn default_value(&self) -> Value {
        json!(self.mode.default_value())
    }

    fn compute(
        &self,
        store: &dyn RecordStore,
        _scope: &ComputeScope,
    ) -> Result<ComputeOutcome, ComputationError> {
        let records = store.find(&self.source, &MatchExpr::All, &Modifier::none())?;
        let total = records.len() as i64;
        let matched = records.iter().filter(|r| self.matcher.eval(r)).count() as i64;
        Ok(ComputeOutcome::Patches(self.patches(matched, total)))
    }

    fn on_mutation(
        &self,
        store: &dyn RecordStore,
        event: &MutationEvent,
    ) -> Result<MutationEffect, ComputationError> {
        if event.record_name != self.source {
            return Ok(MutationEffect::None);
        }

        let missing = |side: &str| ComputationError::State {
            reason: format!("update event missing {side} record"),
        };
        let (match_delta, total_delta) = match event.kind {
            MutationKind::Create => {
                let new = event.record.as_ref().ok_or_else(|| missing("new"))?;
                (i64::from(self.matcher.eval(new)), 1)
            }
            MutationKind::Delete => {
                let old = event.old_record.as_ref().ok_or_else(|| missing("old"))?;
                (-i64::from(self.matcher.eval(old)), -1)
            }
            MutationKind::Update => {
                let old = event.old_record.as_ref().ok_or_else(|| missing("old"))?;
                let new = event.record.as_ref().ok_or_else(|| missing("new"))?;
                (
                    i64::from(self.matcher.eval(new)) - i64::from(self.matcher.eval(old)),
                    0,
                )
            }
        };
        if match_delta == 0 && total_delta == 0 {
            return Ok(MutationEffect::None);
        }

        let matched = self.state_i64(store, &self.match_key)? + match_delta;
        let total = self.state_i64(store, &self.total_key)? + total_delta;
        Ok(MutationEffect::Patches(self.patches(matched, total)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_mode_semantics() {
        let every = BoolMode::Every { not_empty: false };
        assert!(every.eval(0, 0));
        assert!(every.eval(3, 3));
        assert!(!every.eval(2, 3));

        let strict = BoolMode::Every { not_empty: true };
        assert!(!strict.eval(0, 0));
        assert!(strict.eval(2, 2));

        assert!(!BoolMode::Any.eval(0, 5));
        assert!(BoolMode::Any.eval(1, 5));
        assert!(!BoolMode::Any.default_value());
    }

    #[test]
    fn hidden_attr_names() {
        assert_eq!(match_attr("approved"), "_approved_match_count");
        assert_eq!(total_attr("approved"), "_approved_total_count");
    }

    #[test]
    fn global_bool_tracks_deltas() {
        let decl = Every::of(
            "Check",
            RecordPredicate::new(|r| r.get_bool("ok") == Some(true)),
        )
        .not_empty();
        let handle = GlobalBoolHandle::every("all_ok".to_string(), decl);

        let mut store = deriva_storage::InMemoryStore::new();
        store.set_state("_all_ok_match_count", json!(1)).unwrap();
        store.set_state("_all_ok_total_count", json!(1)).unwrap();
        store.set_state("all_ok", json!(true)).unwrap();

        let mut failing = Record::new(RecordId(2));
        failing.set("ok", json!(false));
        let event = MutationEvent::create("Check", failing);

        match handle.on_mutation(&store, &event).unwrap() {
            MutationEffect::Patches(patches) => {
                assert_eq!(patches.len(), 3);
                assert_eq!(
                    patches[2],
                    StatePatch::SetGlobal {
                        key: "all_ok".to_string(),
                        value: json!(false),
                    }
                );
            }
            other => panic!("expected patches, got {other:?}"),
        }
    }
}
