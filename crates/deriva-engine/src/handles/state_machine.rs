//! StateMachine: a named current-state value per host record,
//! transitioning along declared transfer edges.
//!
//! A transfer fires when its trigger matches the mutation event (deep
//! partial match, or an interaction identity), its optional condition
//! passes, and the host selected by `compute_target` currently sits in
//! the transfer's `current` state. The stored property becomes the next
//! state's name, or `compute_value(host)` when the next state declares
//! one -- in which case a hidden `_<attr>_state` shadow field tracks the
//! machine position.

use std::collections::HashSet;

use serde_json::{json, Value};

use deriva_core::computation::{StateMachine, StateNode, Trigger};
use deriva_core::event::{MutationEvent, MutationKind};
use deriva_core::id::RecordId;
use deriva_core::record::Record;
use deriva_core::schema::INTERACTION_RECORD;
use deriva_storage::RecordStore;

use crate::deps::DataDep;
use crate::error::{ComputationError, ConditionError};
use crate::patch::{ComputeOutcome, ComputeScope, MutationEffect, StatePatch};

use super::ComputationHandle;

/// Hidden shadow field tracking machine position when states carry
/// computed values.
pub(crate) fn shadow_attr(attribute: &str) -> String {
    format!("_{attribute}_state")
}

/// Checks a machine declaration for dangling state names.
pub(crate) fn validate(decl: &StateMachine) -> Result<(), ComputationError> {
    let known: HashSet<&str> = decl.states.iter().map(|s| s.name.as_str()).collect();
    let unknown = |name: &str| ComputationError::State {
        reason: format!("state machine references undeclared state '{name}'"),
    };
    if !known.contains(decl.default_state.as_str()) {
        return Err(unknown(&decl.default_state));
    }
    for transfer in &decl.transfers {
        if !known.contains(transfer.current.as_str()) {
            return Err(unknown(&transfer.current));
        }
        if !known.contains(transfer.next.as_str()) {
            return Err(unknown(&transfer.next));
        }
    }
    Ok(())
}

/// Per-host state property maintained from trigger events.
#[derive(Debug)]
pub struct StateMachineHandle {
    host_record: String,
    attribute: String,
    /// Present when any state computes its stored value.
    shadow: Option<String>,
    machine: StateMachine,
    trigger_sources: Vec<String>,
}

impl StateMachineHandle {
    pub(crate) fn new(host_record: String, attribute: String, machine: StateMachine) -> Self {
        let shadow = machine
            .states
            .iter()
            .any(|s| s.compute_value.is_some())
            .then(|| shadow_attr(&attribute));

        let mut trigger_sources: Vec<String> = Vec::new();
        for transfer in &machine.transfers {
            let source = match &transfer.trigger {
                Trigger::Record { record, .. } => record.clone(),
                Trigger::Interaction { .. } => INTERACTION_RECORD.to_string(),
            };
            if !trigger_sources.contains(&source) {
                trigger_sources.push(source);
            }
        }

        StateMachineHandle {
            host_record,
            attribute,
            shadow,
            machine,
            trigger_sources,
        }
    }

    fn trigger_matches(trigger: &Trigger, event: &MutationEvent) -> bool {
        match trigger {
            Trigger::Record {
                record,
                kind,
                pattern,
            } => {
                event.record_name == *record
                    && kind.map_or(true, |k| k == event.kind)
                    && pattern.as_ref().map_or(true, |p| event.matches(p))
            }
            Trigger::Interaction { name } => {
                event.record_name == INTERACTION_RECORD
                    && event.kind == MutationKind::Create
                    && event
                        .record
                        .as_ref()
                        .and_then(|r| r.get_str("name"))
                        .is_some_and(|n| n == name)
            }
        }
    }

    /// The machine position of a host: the shadow field when values are
    /// computed, otherwise the state property itself.
    fn current_state<'a>(&self, host: &'a Record) -> Result<&'a str, ComputationError> {
        let attr = self.shadow.as_deref().unwrap_or(&self.attribute);
        host.get_str(attr).ok_or_else(|| ComputationError::State {
            reason: format!(
                "host {}[{}] has no state in '{attr}'",
                self.host_record, host.id
            ),
        })
    }

    fn state_node(&self, name: &str) -> Result<&StateNode, ComputationError> {
        self.machine
            .states
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ComputationError::State {
                reason: format!("state machine references undeclared state '{name}'"),
            })
    }

    fn enter_patches(&self, host: &Record, next: &StateNode) -> Vec<StatePatch> {
        let value = next
            .compute_value
            .as_ref()
            .map_or_else(|| json!(next.name), |f| f.eval(host));
        let mut patches = vec![StatePatch::SetProperty {
            record_name: self.host_record.clone(),
            id: host.id,
            attribute: self.attribute.clone(),
            value,
        }];
        if let Some(shadow) = &self.shadow {
            patches.push(StatePatch::SetProperty {
                record_name: self.host_record.clone(),
                id: host.id,
                attribute: shadow.clone(),
                value: json!(next.name),
            });
        }
        patches
    }
}

impl ComputationHandle for StateMachineHandle {
    fn name(&self) -> &'static str {
        "state_machine"
    }

    fn data_deps(&self) -> Vec<DataDep> {
        self.trigger_sources
            .iter()
            .map(DataDep::records)
            .collect()
    }

    fn default_value(&self) -> Value {
        json!(self.machine.default_state)
    }

    fn seed_fields(&self) -> Vec<(String, Value)> {
        let mut fields = vec![(self.attribute.clone(), self.default_value())];
        if let Some(shadow) = &self.shadow {
            fields.push((shadow.clone(), self.default_value()));
        }
        fields
    }

    fn compute(
        &self,
        _store: &dyn RecordStore,
        scope: &ComputeScope,
    ) -> Result<ComputeOutcome, ComputationError> {
        // From scratch means the default state: mutation history is not
        // replayable from a snapshot.
        let ComputeScope::Record(host) = scope else {
            return Err(ComputationError::State {
                reason: "state machines are host-scoped".to_string(),
            });
        };
        let mut patches = vec![StatePatch::SetProperty {
            record_name: self.host_record.clone(),
            id: *host,
            attribute: self.attribute.clone(),
            value: self.default_value(),
        }];
        if let Some(shadow) = &self.shadow {
            patches.push(StatePatch::SetProperty {
                record_name: self.host_record.clone(),
                id: *host,
                attribute: shadow.clone(),
                value: self.default_value(),
            });
        }
        Ok(ComputeOutcome::Patches(patches))
    }

    fn on_mutation(
        &self,
        store: &dyn RecordStore,
        event: &MutationEvent,
    ) -> Result<MutationEffect, ComputationError> {
        let mut patches = Vec::new();
        let mut handled: HashSet<RecordId> = HashSet::new();

        for transfer in &self.machine.transfers {
            if !Self::trigger_matches(&transfer.trigger, event) {
                continue;
            }
            let Some(host_id) = transfer.compute_target.eval(event) else {
                continue;
            };
            // First matching transfer wins per host.
            if handled.contains(&host_id) {
                continue;
            }
            let host = store.get(&self.host_record, host_id)?.ok_or_else(|| {
                ComputationError::DataDep {
                    reason: format!(
                        "transfer target {}[{host_id}] missing",
                        self.host_record
                    ),
                }
            })?;
            if self.current_state(&host)? != transfer.current {
                continue;
            }
            if let Some(condition) = &transfer.condition {
                match condition.eval(event) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(reason) => return Err(ConditionError { reason }.into()),
                }
            }
            let next = self.state_node(&transfer.next)?;
            patches.extend(self.enter_patches(&host, next));
            handled.insert(host_id);
        }

        Ok(if patches.is_empty() {
            MutationEffect::None
        } else {
            MutationEffect::Patches(patches)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deriva_core::computation::{StateTransfer, TargetFn};
    use deriva_core::record::Fields;
    use deriva_storage::InMemoryStore;

    /// Post lifecycle: normal -> draft -> normal -> published -> normal.
    fn post_machine() -> StateMachine {
        let target = || {
            TargetFn::new(|event| {
                event
                    .record
                    .as_ref()
                    .and_then(|r| r.get("payload"))
                    .and_then(|p| p.get("post"))
                    .and_then(Value::as_i64)
                    .map(RecordId)
            })
        };
        let interaction = |name: &str| Trigger::Interaction {
            name: name.to_string(),
        };
        StateMachine::new(
            vec![
                StateNode::named("normal"),
                StateNode::named("draft"),
                StateNode::named("published"),
            ],
            vec![
                StateTransfer {
                    current: "normal".to_string(),
                    next: "draft".to_string(),
                    trigger: interaction("draft"),
                    compute_target: target(),
                    condition: None,
                },
                StateTransfer {
                    current: "draft".to_string(),
                    next: "normal".to_string(),
                    trigger: interaction("finalize"),
                    compute_target: target(),
                    condition: None,
                },
                StateTransfer {
                    current: "normal".to_string(),
                    next: "published".to_string(),
                    trigger: interaction("publish"),
                    compute_target: target(),
                    condition: None,
                },
                StateTransfer {
                    current: "published".to_string(),
                    next: "normal".to_string(),
                    trigger: interaction("withdraw"),
                    compute_target: target(),
                    condition: None,
                },
            ],
            "normal",
        )
    }

    fn interaction_event(name: &str, post: i64) -> MutationEvent {
        let mut rec = Record::new(RecordId(99));
        rec.set("name", json!(name));
        rec.set("payload", json!({ "post": post }));
        MutationEvent::create(INTERACTION_RECORD, rec)
    }

    fn store_with_post(state: &str) -> (InMemoryStore, RecordId) {
        let mut store = InMemoryStore::new();
        store.install_record_type("Post").unwrap();
        let mut fields = Fields::new();
        fields.insert("status".to_string(), json!(state));
        let (post, _) = store.create("Post", fields).unwrap();
        (store, post.id)
    }

    fn handle() -> StateMachineHandle {
        StateMachineHandle::new("Post".to_string(), "status".to_string(), post_machine())
    }

    #[test]
    fn matching_trigger_moves_state() {
        let (store, post_id) = store_with_post("normal");
        let event = interaction_event("draft", post_id.0);
        match handle().on_mutation(&store, &event).unwrap() {
            MutationEffect::Patches(patches) => {
                assert_eq!(
                    patches,
                    vec![StatePatch::SetProperty {
                        record_name: "Post".to_string(),
                        id: post_id,
                        attribute: "status".to_string(),
                        value: json!("draft"),
                    }]
                );
            }
            other => panic!("expected patches, got {other:?}"),
        }
    }

    #[test]
    fn no_declared_transfer_is_a_noop() {
        // publish while draft: no transfer declared from draft.
        let (store, post_id) = store_with_post("draft");
        let event = interaction_event("publish", post_id.0);
        assert!(matches!(
            handle().on_mutation(&store, &event).unwrap(),
            MutationEffect::None
        ));
    }

    #[test]
    fn failing_condition_leaves_state_unchanged() {
        let mut machine = post_machine();
        machine.transfers[0].condition = Some(deriva_core::computation::ConditionFn::new(
            |_| Ok(false),
        ));
        let handle = StateMachineHandle::new("Post".to_string(), "status".to_string(), machine);

        let (store, post_id) = store_with_post("normal");
        let event = interaction_event("draft", post_id.0);
        assert!(matches!(
            handle.on_mutation(&store, &event).unwrap(),
            MutationEffect::None
        ));
    }

    #[test]
    fn condition_errors_are_condition_errors() {
        let mut machine = post_machine();
        machine.transfers[0].condition = Some(deriva_core::computation::ConditionFn::new(
            |_| Err("permission store unreachable".to_string()),
        ));
        let handle = StateMachineHandle::new("Post".to_string(), "status".to_string(), machine);

        let (store, post_id) = store_with_post("normal");
        let event = interaction_event("draft", post_id.0);
        let err = handle.on_mutation(&store, &event).unwrap_err();
        assert!(matches!(err, ComputationError::Condition(_)));
    }

    #[test]
    fn computed_state_value_uses_shadow_field() {
        let machine = StateMachine::new(
            vec![
                StateNode::named("off"),
                StateNode::named("on").with_value(deriva_core::computation::ValueFn::new(
                    |host| json!(format!("on:{}", host.get_str("name").unwrap_or(""))),
                )),
            ],
            vec![StateTransfer {
                current: "off".to_string(),
                next: "on".to_string(),
                trigger: Trigger::Interaction {
                    name: "enable".to_string(),
                },
                compute_target: TargetFn::new(|event| {
                    event
                        .record
                        .as_ref()
                        .and_then(|r| r.get("payload"))
                        .and_then(|p| p.get("post"))
                        .and_then(Value::as_i64)
                        .map(RecordId)
                }),
                condition: None,
            }],
            "off",
        );
        let handle = StateMachineHandle::new("Post".to_string(), "status".to_string(), machine);
        assert_eq!(
            handle.seed_fields(),
            vec![
                ("status".to_string(), json!("off")),
                ("_status_state".to_string(), json!("off")),
            ]
        );

        let mut store = InMemoryStore::new();
        store.install_record_type("Post").unwrap();
        let mut fields = Fields::new();
        fields.insert("name".to_string(), json!("p1"));
        fields.insert("status".to_string(), json!("off"));
        fields.insert("_status_state".to_string(), json!("off"));
        let (post, _) = store.create("Post", fields).unwrap();

        let event = interaction_event("enable", post.id.0);
        match handle.on_mutation(&store, &event).unwrap() {
            MutationEffect::Patches(patches) => {
                assert_eq!(patches.len(), 2);
                assert_eq!(
                    patches[0],
                    StatePatch::SetProperty {
                        record_name: "Post".to_string(),
                        id: post.id,
                        attribute: "status".to_string(),
                        value: json!("on:p1"),
                    }
                );
                assert_eq!(
                    patches[1],
                    StatePatch::SetProperty {
                        record_name: "Post".to_string(),
                        id: post.id,
                        attribute: "_status_state".to_string(),
                        value: json!("on"),
                    }
                );
            }
            other => panic!("expected patches, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_dangling_states() {
        let machine = StateMachine::new(
            vec![StateNode::named("a")],
            vec![StateTransfer {
                current: "a".to_string(),
                next: "missing".to_string(),
                trigger: Trigger::Interaction {
                    name: "x".to_string(),
                },
                compute_target: TargetFn::new(|_| None),
                condition: None,
            }],
            "a",
        );
        assert!(validate(&machine).is_err());
    }
}
