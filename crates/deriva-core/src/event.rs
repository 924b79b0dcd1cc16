//! Mutation events: the canonical description of one committed storage
//! change.
//!
//! Every create/update/delete performed by a store produces a
//! [`MutationEvent`] carrying the relevant record snapshots. The payload
//! invariants are part of the contract:
//!
//! - `create` carries `record` (the new snapshot) only.
//! - `update` carries both `record` (new) and `old_record` (previous).
//! - `delete` carries `old_record` (the removed snapshot) only.
//!
//! A relation mutation may carry a `related` event pointing at the record
//! mutation that caused it (a relation created as a side effect of an
//! entity create).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::RecordId;
use crate::record::Record;

/// The kind of storage change an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

/// One committed create/update/delete on a named record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    /// The entity or relation name the mutation applies to.
    pub record_name: String,
    /// What happened.
    pub kind: MutationKind,
    /// New snapshot (`create` and `update`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<Record>,
    /// Previous snapshot (`update` and `delete`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_record: Option<Record>,
    /// The underlying mutation that caused this one, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related: Option<Box<MutationEvent>>,
}

impl MutationEvent {
    /// A create event carrying the new record.
    pub fn create(record_name: impl Into<String>, record: Record) -> Self {
        MutationEvent {
            record_name: record_name.into(),
            kind: MutationKind::Create,
            record: Some(record),
            old_record: None,
            related: None,
        }
    }

    /// An update event carrying both snapshots.
    pub fn update(record_name: impl Into<String>, old: Record, new: Record) -> Self {
        MutationEvent {
            record_name: record_name.into(),
            kind: MutationKind::Update,
            record: Some(new),
            old_record: Some(old),
            related: None,
        }
    }

    /// A delete event carrying the removed record.
    pub fn delete(record_name: impl Into<String>, old: Record) -> Self {
        MutationEvent {
            record_name: record_name.into(),
            kind: MutationKind::Delete,
            record: None,
            old_record: Some(old),
            related: None,
        }
    }

    /// Attaches the mutation that caused this one.
    pub fn with_related(mut self, related: MutationEvent) -> Self {
        self.related = Some(Box::new(related));
        self
    }

    /// The snapshot that currently exists: `record` for create/update,
    /// `old_record` for delete.
    pub fn current(&self) -> Option<&Record> {
        match self.kind {
            MutationKind::Create | MutationKind::Update => self.record.as_ref(),
            MutationKind::Delete => self.old_record.as_ref(),
        }
    }

    /// The id of the mutated record, regardless of kind.
    pub fn target_id(&self) -> Option<RecordId> {
        self.current().map(|r| r.id)
    }

    /// Attribute names whose values differ between `old_record` and
    /// `record`. Empty for create/delete (where "everything" changed).
    pub fn changed_attributes(&self) -> Vec<String> {
        let (Some(old), Some(new)) = (self.old_record.as_ref(), self.record.as_ref()) else {
            return Vec::new();
        };
        let mut changed = Vec::new();
        for (name, value) in &new.fields {
            if old.fields.get(name) != Some(value) {
                changed.push(name.clone());
            }
        }
        for name in old.fields.keys() {
            if !new.fields.contains_key(name) {
                changed.push(name.clone());
            }
        }
        changed
    }

    /// Deep partial match of `pattern` against this event's JSON form.
    ///
    /// Every leaf in the pattern must equal the corresponding leaf in the
    /// event; object patterns only constrain the keys they mention.
    pub fn matches(&self, pattern: &Value) -> bool {
        let event = serde_json::to_value(self).unwrap_or(Value::Null);
        matches_partial(pattern, &event)
    }
}

/// Structural partial match: objects constrain only their own keys,
/// everything else compares by equality.
pub fn matches_partial(pattern: &Value, value: &Value) -> bool {
    match (pattern, value) {
        (Value::Object(pat), Value::Object(val)) => pat
            .iter()
            .all(|(k, p)| val.get(k).is_some_and(|v| matches_partial(p, v))),
        _ => pattern == value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: i64, fields: &[(&str, Value)]) -> Record {
        let mut rec = Record::new(RecordId(id));
        for (name, value) in fields {
            rec.set(*name, value.clone());
        }
        rec
    }

    #[test]
    fn create_carries_only_new_snapshot() {
        let ev = MutationEvent::create("Post", record(1, &[("title", json!("a"))]));
        assert_eq!(ev.kind, MutationKind::Create);
        assert!(ev.record.is_some());
        assert!(ev.old_record.is_none());
        assert_eq!(ev.target_id(), Some(RecordId(1)));
    }

    #[test]
    fn update_carries_both_snapshots() {
        let old = record(1, &[("title", json!("a"))]);
        let new = record(1, &[("title", json!("b"))]);
        let ev = MutationEvent::update("Post", old, new);
        assert!(ev.record.is_some());
        assert!(ev.old_record.is_some());
        assert_eq!(ev.changed_attributes(), vec!["title".to_string()]);
    }

    #[test]
    fn delete_current_is_old_record() {
        let ev = MutationEvent::delete("Post", record(3, &[]));
        assert_eq!(ev.current().map(|r| r.id), Some(RecordId(3)));
    }

    #[test]
    fn changed_attributes_includes_removed_fields() {
        let old = record(1, &[("a", json!(1)), ("b", json!(2))]);
        let new = record(1, &[("a", json!(1))]);
        let ev = MutationEvent::update("Post", old, new);
        assert_eq!(ev.changed_attributes(), vec!["b".to_string()]);
    }

    #[test]
    fn partial_match_constrains_mentioned_keys_only() {
        let ev = MutationEvent::create(
            "Post",
            record(1, &[("status", json!("draft")), ("title", json!("x"))]),
        );
        assert!(ev.matches(&json!({"kind": "create", "record_name": "Post"})));
        assert!(ev.matches(&json!({"record": {"fields": {"status": "draft"}}})));
        assert!(!ev.matches(&json!({"record": {"fields": {"status": "published"}}})));
        assert!(!ev.matches(&json!({"kind": "delete"})));
    }

    #[test]
    fn wire_shape_is_stable() {
        let ev = MutationEvent::create("Post", record(1, &[("title", json!("hi"))]));
        let json = serde_json::to_string(&ev).unwrap();
        insta::assert_snapshot!(
            json,
            @r#"{"record_name":"Post","kind":"create","record":{"id":1,"fields":{"title":"hi"}}}"#
        );
    }
}
