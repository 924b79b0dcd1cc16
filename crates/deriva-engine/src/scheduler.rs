//! The scheduler: central dispatch loop of the reactive engine.
//!
//! On receipt of a mutation batch, each event is matched against the
//! dependency index; affected computations run sequentially in declaration
//! order; their patches are applied to storage; and any mutation events
//! those writes produce are fed back into the loop until fixpoint.
//!
//! # Termination
//!
//! Every derived event carries a provenance chain of
//! `(computation, bound record)` entries. A computation re-entered for the
//! same bound record along its own chain fails fast with
//! `CycleDetected`; chains longer than [`MAX_CASCADE_DEPTH`] fail with
//! `CascadeOverflow`. Sibling events in one batch may legitimately
//! retrigger the same computation. Unchanged writes are suppressed at the
//! storage boundary, which terminates benign self-stabilizing cascades.
//!
//! # Ordering
//!
//! Events are processed strictly in arrival order and affected
//! computations in declaration order. This yields deterministic final
//! state for a given batch sequence, but is NOT a topological order: a
//! computation declared before its producer may transiently read a stale
//! value within one cascade.
//!
//! # Failure
//!
//! The first computation error aborts the remainder of the cascade and
//! surfaces to the caller. Patches already applied stay; rollback is the
//! storage collaborator's transaction boundary, not the engine's.

use std::collections::VecDeque;

use serde_json::Value;
use smallvec::SmallVec;

use deriva_core::computation::{Computed, DataContext, DefaultFn};
use deriva_core::event::MutationEvent;
use deriva_core::id::{ComputationId, RecordId};
use deriva_core::record::Fields;
use deriva_core::schema::SchemaRegistry;
use deriva_storage::RecordStore;

use crate::error::SchedulerError;
use crate::handles::{self, ComputationHandle};
use crate::index::DependencyIndex;
use crate::patch::{ComputeOutcome, ComputeScope, MutationEffect, StatePatch};
use crate::tasks::{self, STATUS_ERROR, STATUS_SUCCESS};

/// Upper bound on one cascade chain's length.
pub const MAX_CASCADE_DEPTH: usize = 64;

/// One registered computation: declaration context plus its handle.
pub struct RegisteredComputation {
    pub id: ComputationId,
    pub context: DataContext,
    pub handle: Box<dyn ComputationHandle>,
}

/// Where a record default comes from.
enum DefaultSource {
    /// Fixed value contributed by a computation's default.
    Value(Value),
    /// Declared property default factory, evaluated per create.
    Factory(DefaultFn),
}

/// A default field seeded onto newly created records of one type.
struct RecordDefault {
    record: String,
    attribute: String,
    source: DefaultSource,
}

type Provenance = SmallVec<[(ComputationId, Option<RecordId>); 4]>;

/// An event queued for propagation, with its cascade lineage.
struct PendingEvent {
    event: MutationEvent,
    provenance: Provenance,
}

/// Counters and derived events from one dispatch.
#[derive(Debug, Default)]
pub struct DispatchSummary {
    /// Events consumed, original batch included.
    pub events_processed: usize,
    /// Computation invocations performed.
    pub computations_run: usize,
    /// Mutation events produced by applied patches.
    pub derived: Vec<MutationEvent>,
}

/// The dispatch engine. Registration happens once at setup; dispatch is
/// then read-only over the registrations, with storage as the single
/// mutable resource.
#[derive(Default)]
pub struct Scheduler {
    computations: Vec<RegisteredComputation>,
    index: DependencyIndex,
    defaults: Vec<RecordDefault>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler::default()
    }

    /// Registers one declared computation, expanding it into handles and
    /// indexing their dependencies. Returns the assigned ids, in
    /// declaration order.
    pub fn register(
        &mut self,
        context: DataContext,
        computed: &Computed,
        schema: &SchemaRegistry,
    ) -> Result<Vec<ComputationId>, SchedulerError> {
        let built = handles::build(&context, computed, schema)?;
        let mut ids = Vec::with_capacity(built.len());
        for handle in built {
            let id = ComputationId(self.computations.len() as u32);
            self.index.register(id, &handle.data_deps());
            if let DataContext::Property { host, .. } = &context {
                for (attribute, value) in handle.seed_fields() {
                    self.defaults.push(RecordDefault {
                        record: host.clone(),
                        attribute,
                        source: DefaultSource::Value(value),
                    });
                }
            }
            self.computations.push(RegisteredComputation {
                id,
                context: context.clone(),
                handle,
            });
            ids.push(id);
        }
        Ok(ids)
    }

    /// Registers a declared property default (non-computed), evaluated on
    /// each create of the record type.
    pub fn register_property_default(
        &mut self,
        record: impl Into<String>,
        attribute: impl Into<String>,
        default: DefaultFn,
    ) {
        self.defaults.push(RecordDefault {
            record: record.into(),
            attribute: attribute.into(),
            source: DefaultSource::Factory(default),
        });
    }

    /// Number of registered computations.
    pub fn computation_count(&self) -> usize {
        self.computations.len()
    }

    /// Fills in default fields for a new record of `record_name`, without
    /// overwriting caller-provided values.
    pub fn seed_record_fields(&self, record_name: &str, fields: &mut Fields) {
        for default in &self.defaults {
            if default.record != record_name || fields.contains_key(&default.attribute) {
                continue;
            }
            let value = match &default.source {
                DefaultSource::Value(value) => value.clone(),
                DefaultSource::Factory(factory) => factory.eval(),
            };
            fields.insert(default.attribute.clone(), value);
        }
    }

    /// Seeds initial values for global computations via full compute.
    /// Pending outcomes persist a task record instead of a value.
    pub fn seed_initial_values(
        &self,
        store: &mut dyn RecordStore,
    ) -> Result<(), SchedulerError> {
        for comp in &self.computations {
            if !matches!(comp.context, DataContext::Global { .. }) {
                continue;
            }
            let outcome = comp.handle.compute(&*store, &ComputeScope::Global)?;
            match outcome {
                ComputeOutcome::Patches(patches) => {
                    for patch in patches {
                        self.apply_patch(store, patch)?;
                    }
                }
                ComputeOutcome::Pending { args } => {
                    tasks::create_task(store, comp.id, &ComputeScope::Global, args)?;
                }
            }
        }
        Ok(())
    }

    /// Propagates one mutation batch to fixpoint.
    pub fn dispatch(
        &self,
        store: &mut dyn RecordStore,
        batch: Vec<MutationEvent>,
    ) -> Result<DispatchSummary, SchedulerError> {
        tracing::debug!("dispatching mutation batch of {} event(s)", batch.len());
        let queue: VecDeque<PendingEvent> = batch
            .into_iter()
            .map(|event| PendingEvent {
                event,
                provenance: Provenance::new(),
            })
            .collect();
        let mut summary = DispatchSummary::default();
        self.run_queue(store, queue, &mut summary)?;
        Ok(summary)
    }

    /// Consumes a resolved async task: runs the computation's
    /// async-return, applies its patches, removes the task record, and
    /// propagates the resulting events.
    pub fn handle_async_return(
        &self,
        store: &mut dyn RecordStore,
        task_id: RecordId,
    ) -> Result<DispatchSummary, SchedulerError> {
        let record = store
            .get(deriva_core::schema::TASK_RECORD, task_id)?
            .ok_or_else(|| SchedulerError::Task {
                id: task_id,
                reason: "not found".to_string(),
            })?;
        let task = tasks::parse_task(&record)?;
        match task.status.as_str() {
            STATUS_SUCCESS => {}
            STATUS_ERROR => {
                return Err(SchedulerError::Task {
                    id: task_id,
                    reason: format!("task failed externally: {}", task.result),
                });
            }
            other => {
                return Err(SchedulerError::Task {
                    id: task_id,
                    reason: format!("task not resolved (status '{other}')"),
                });
            }
        }

        let comp = self.computation(task.computation)?;
        tracing::debug!(
            "resuming computation {} from task {}",
            comp.id,
            task_id
        );
        let patches = comp
            .handle
            .async_return(&task.result, &task.args, &task.scope)?;

        let mut summary = DispatchSummary::default();
        let mut queue = VecDeque::new();

        // Consume the task record first; its delete event propagates like
        // any other.
        let delete_events = store.delete(deriva_core::schema::TASK_RECORD, task_id)?;
        for event in delete_events {
            summary.derived.push(event.clone());
            queue.push_back(PendingEvent {
                event,
                provenance: Provenance::new(),
            });
        }

        self.apply_effect_patches(
            store,
            comp.id,
            patches,
            &Provenance::new(),
            deriva_core::schema::TASK_RECORD,
            &mut queue,
            &mut summary,
        )?;
        self.run_queue(store, queue, &mut summary)?;
        Ok(summary)
    }

    // -------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------

    fn computation(
        &self,
        id: ComputationId,
    ) -> Result<&RegisteredComputation, SchedulerError> {
        self.computations
            .get(id.0 as usize)
            .filter(|c| c.id == id)
            .ok_or(SchedulerError::UnknownComputation { computation: id })
    }

    /// Drains the queue, feeding derived events back in until fixpoint.
    fn run_queue(
        &self,
        store: &mut dyn RecordStore,
        mut queue: VecDeque<PendingEvent>,
        summary: &mut DispatchSummary,
    ) -> Result<(), SchedulerError> {
        while let Some(pending) = queue.pop_front() {
            summary.events_processed += 1;
            let affected = self.index.find_affected(&pending.event);
            if affected.is_empty() {
                continue;
            }
            tracing::trace!(
                "event {:?} on '{}' affects {} computation(s)",
                pending.event.kind,
                pending.event.record_name,
                affected.len()
            );
            for comp_id in affected {
                let comp = self.computation(comp_id)?;
                summary.computations_run += 1;
                let effect = comp.handle.on_mutation(&*store, &pending.event)?;
                match effect {
                    MutationEffect::None => {}
                    MutationEffect::Patches(patches) => {
                        tracing::trace!(
                            "computation {} ({}) produced {} patch(es)",
                            comp_id,
                            comp.handle.name(),
                            patches.len()
                        );
                        self.apply_effect_patches(
                            store,
                            comp_id,
                            patches,
                            &pending.provenance,
                            &pending.event.record_name,
                            &mut queue,
                            &mut *summary,
                        )?;
                    }
                    MutationEffect::Pending { scope, args } => {
                        tracing::debug!(
                            "computation {} ({}) suspended into a pending task",
                            comp_id,
                            comp.handle.name()
                        );
                        let (_, events) = tasks::create_task(store, comp_id, &scope, args)?;
                        let mut provenance = pending.provenance.clone();
                        provenance.push((comp_id, scope.record()));
                        for event in events {
                            summary.derived.push(event.clone());
                            queue.push_back(PendingEvent {
                                event,
                                provenance: provenance.clone(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Applies one computation's patches, enqueueing the events they
    /// produce with extended provenance. Guards cycles and depth.
    #[allow(clippy::too_many_arguments)]
    fn apply_effect_patches(
        &self,
        store: &mut dyn RecordStore,
        computation: ComputationId,
        patches: Vec<StatePatch>,
        provenance: &Provenance,
        origin_record: &str,
        queue: &mut VecDeque<PendingEvent>,
        summary: &mut DispatchSummary,
    ) -> Result<(), SchedulerError> {
        for patch in patches {
            let target = patch.target();
            if provenance
                .iter()
                .any(|(comp, record)| *comp == computation && *record == target)
            {
                return Err(SchedulerError::CycleDetected {
                    computation,
                    record: target,
                });
            }
            if provenance.len() >= MAX_CASCADE_DEPTH {
                return Err(SchedulerError::CascadeOverflow {
                    max: MAX_CASCADE_DEPTH,
                    record_name: origin_record.to_string(),
                });
            }

            let events = self.apply_patch(store, patch)?;
            let mut extended = provenance.clone();
            extended.push((computation, target));
            for event in events {
                summary.derived.push(event.clone());
                queue.push_back(PendingEvent {
                    event,
                    provenance: extended.clone(),
                });
            }
        }
        Ok(())
    }

    /// Applies one patch to storage, returning the events it produced.
    /// New records receive default fields for attributes the patch leaves
    /// unset.
    fn apply_patch(
        &self,
        store: &mut dyn RecordStore,
        patch: StatePatch,
    ) -> Result<Vec<MutationEvent>, SchedulerError> {
        Ok(match patch {
            StatePatch::SetGlobal { key, value } => {
                // State writes emit no events; skip unchanged values.
                if store.get_state(&key)?.as_ref() != Some(&value) {
                    store.set_state(&key, value)?;
                }
                Vec::new()
            }
            StatePatch::SetProperty {
                record_name,
                id,
                attribute,
                value,
            } => {
                let mut fields = Fields::new();
                fields.insert(attribute, value);
                store.update(&record_name, id, fields)?
            }
            StatePatch::CreateRecord {
                record_name,
                mut fields,
            } => {
                self.seed_record_fields(&record_name, &mut fields);
                let (_, events) = store.create(&record_name, fields)?;
                events
            }
            StatePatch::UpdateRecord {
                record_name,
                id,
                fields,
            } => store.update(&record_name, id, fields)?,
            StatePatch::DeleteRecord { record_name, id } => store.delete(&record_name, id)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deriva_core::computation::{
        Count, Every, MapMutationFn, MapRecordMutation, RecordPredicate, Transform, TransformFn,
    };
    use deriva_core::event::MutationKind;
    use deriva_core::record::Record;
    use deriva_core::schema::{
        Cardinality, Entity, Property, PropertyType, Relation, RelationSide, TASK_RECORD,
    };
    use deriva_storage::{InMemoryStore, MatchExpr, Modifier};
    use serde_json::json;

    fn fields(pairs: &[(&str, serde_json::Value)]) -> Fields {
        let mut f = Fields::new();
        for (name, value) in pairs {
            f.insert((*name).to_string(), value.clone());
        }
        f
    }

    /// Creates a record with scheduler-seeded defaults, like the
    /// controller does, and returns it with its events.
    fn seeded_create(
        scheduler: &Scheduler,
        store: &mut InMemoryStore,
        record_name: &str,
        mut new_fields: Fields,
    ) -> (Record, Vec<MutationEvent>) {
        scheduler.seed_record_fields(record_name, &mut new_fields);
        store.create(record_name, new_fields).unwrap()
    }

    fn user_post_schema() -> SchemaRegistry {
        let mut schema = SchemaRegistry::new();
        schema
            .add_entity(Entity::new("User").with_property(Property::new(
                "name",
                PropertyType::String,
            )))
            .unwrap();
        schema
            .add_entity(Entity::new("Post").with_property(Property::new(
                "title",
                PropertyType::String,
            )))
            .unwrap();
        schema
            .add_relation(Relation::new(
                "UserPost",
                "User",
                "posts",
                "Post",
                "owner",
                Cardinality::OneToMany,
            ))
            .unwrap();
        schema
    }

    fn install(store: &mut InMemoryStore, names: &[&str]) {
        for name in names {
            store.install_record_type(name).unwrap();
        }
    }

    #[test]
    fn count_over_relation_scenario() {
        let schema = user_post_schema();
        let mut scheduler = Scheduler::new();
        scheduler
            .register(
                DataContext::Property {
                    host: "User".to_string(),
                    attribute: "post_count".to_string(),
                },
                &Computed::Count(Count::through("UserPost", RelationSide::Source)),
                &schema,
            )
            .unwrap();

        let mut store = InMemoryStore::new();
        install(&mut store, &["User", "Post", "UserPost"]);

        let (user, events) = seeded_create(&scheduler, &mut store, "User", Fields::new());
        scheduler.dispatch(&mut store, events).unwrap();
        assert_eq!(
            store.get("User", user.id).unwrap().unwrap().get_i64("post_count"),
            Some(0)
        );

        let (post, post_events) = seeded_create(&scheduler, &mut store, "Post", Fields::new());
        let (link, link_events) = seeded_create(
            &scheduler,
            &mut store,
            "UserPost",
            fields(&[("source", json!(user.id.0)), ("target", json!(post.id.0))]),
        );
        let mut batch = post_events;
        batch.extend(link_events);
        scheduler.dispatch(&mut store, batch).unwrap();
        assert_eq!(
            store.get("User", user.id).unwrap().unwrap().get_i64("post_count"),
            Some(1)
        );

        let delete_events = store.delete("UserPost", link.id).unwrap();
        scheduler.dispatch(&mut store, delete_events).unwrap();
        assert_eq!(
            store.get("User", user.id).unwrap().unwrap().get_i64("post_count"),
            Some(0)
        );
    }

    #[test]
    fn every_over_relation_threshold_scenario() {
        let mut schema = SchemaRegistry::new();
        schema.add_entity(Entity::new("Request")).unwrap();
        schema.add_entity(Entity::new("Reviewer")).unwrap();
        schema
            .add_relation(Relation::new(
                "Approval",
                "Request",
                "approvals",
                "Reviewer",
                "reviews",
                Cardinality::ManyToMany,
            ))
            .unwrap();

        let mut scheduler = Scheduler::new();
        scheduler
            .register(
                DataContext::Property {
                    host: "Request".to_string(),
                    attribute: "approved".to_string(),
                },
                &Computed::Every(
                    Every::through(
                        "Approval",
                        RelationSide::Source,
                        RecordPredicate::new(|r| r.get_bool("approved") == Some(true)),
                    )
                    .not_empty(),
                ),
                &schema,
            )
            .unwrap();

        let mut store = InMemoryStore::new();
        install(&mut store, &["Request", "Reviewer", "Approval"]);

        let (request, events) = seeded_create(&scheduler, &mut store, "Request", Fields::new());
        scheduler.dispatch(&mut store, events).unwrap();
        let approved =
            |store: &InMemoryStore| store.get("Request", request.id).unwrap().unwrap().get_bool("approved");
        assert_eq!(approved(&store), Some(false));

        // Two reviewers assigned, neither has approved yet.
        let mut links = Vec::new();
        let mut batch = Vec::new();
        for _ in 0..2 {
            let (link, events) = seeded_create(
                &scheduler,
                &mut store,
                "Approval",
                fields(&[("source", json!(request.id.0)), ("approved", json!(false))]),
            );
            links.push(link);
            batch.extend(events);
        }
        scheduler.dispatch(&mut store, batch).unwrap();
        assert_eq!(approved(&store), Some(false));

        // One of two approvals: still not approved.
        let events = store
            .update("Approval", links[0].id, fields(&[("approved", json!(true))]))
            .unwrap();
        scheduler.dispatch(&mut store, events).unwrap();
        assert_eq!(approved(&store), Some(false));

        // Two of two: approved.
        let events = store
            .update("Approval", links[1].id, fields(&[("approved", json!(true))]))
            .unwrap();
        scheduler.dispatch(&mut store, events).unwrap();
        assert_eq!(approved(&store), Some(true));
    }

    #[test]
    fn transform_noop_update_produces_no_derived_events() {
        let mut schema = SchemaRegistry::new();
        schema
            .add_entity(Entity::new("Post").with_property(Property::new(
                "title",
                PropertyType::String,
            )))
            .unwrap();
        schema.add_entity(Entity::new("Summary")).unwrap();

        let mut scheduler = Scheduler::new();
        scheduler
            .register(
                DataContext::Entity {
                    name: "Summary".to_string(),
                },
                &Computed::Transform(Transform::from(
                    "Post",
                    TransformFn::new(|record| {
                        Some({
                            let mut f = Fields::new();
                            f.insert(
                                "title".to_string(),
                                record.get("title").cloned().unwrap_or(serde_json::Value::Null),
                            );
                            f
                        })
                    }),
                )),
                &schema,
            )
            .unwrap();

        let mut store = InMemoryStore::new();
        install(&mut store, &["Post", "Summary"]);

        let (post, events) = seeded_create(
            &scheduler,
            &mut store,
            "Post",
            fields(&[("title", json!("hello")), ("views", json!(0))]),
        );
        scheduler.dispatch(&mut store, events).unwrap();
        let summaries = store
            .find("Summary", &MatchExpr::All, &Modifier::none())
            .unwrap();
        assert_eq!(summaries.len(), 1);
        let derived_id = summaries[0].id;

        // Changing an unprojected field reruns the callback with the same
        // output: the derived write is suppressed, no new id appears.
        let events = store
            .update("Post", post.id, fields(&[("views", json!(1))]))
            .unwrap();
        let summary = scheduler.dispatch(&mut store, events).unwrap();
        assert!(summary.derived.is_empty());
        let summaries = store
            .find("Summary", &MatchExpr::All, &Modifier::none())
            .unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, derived_id);
    }

    #[test]
    fn mutually_recursive_transforms_fail_fast() {
        let mut schema = SchemaRegistry::new();
        schema.add_entity(Entity::new("Ping")).unwrap();
        schema.add_entity(Entity::new("Pong")).unwrap();

        let bounce = || {
            MapMutationFn::new(|event, _prior| {
                (event.kind == MutationKind::Create).then(|| json!({ "n": 1 }))
            })
        };

        let mut scheduler = Scheduler::new();
        scheduler
            .register(
                DataContext::Entity {
                    name: "Pong".to_string(),
                },
                &Computed::MapRecordMutation(MapRecordMutation::from("Ping", bounce())),
                &schema,
            )
            .unwrap();
        scheduler
            .register(
                DataContext::Entity {
                    name: "Ping".to_string(),
                },
                &Computed::MapRecordMutation(MapRecordMutation::from("Pong", bounce())),
                &schema,
            )
            .unwrap();

        let mut store = InMemoryStore::new();
        install(&mut store, &["Ping", "Pong"]);

        let (_, events) = seeded_create(&scheduler, &mut store, "Ping", Fields::new());
        let err = scheduler.dispatch(&mut store, events).unwrap_err();
        assert!(matches!(err, SchedulerError::CycleDetected { .. }));
    }

    #[test]
    fn seed_initial_values_computes_globals_and_persists_pending_tasks() {
        let mut schema = SchemaRegistry::new();
        schema.add_entity(Entity::new("Post")).unwrap();
        schema.add_global("post_total", Computed::Count(Count::of("Post")));
        schema.add_global(
            "crawl",
            Computed::External(deriva_core::computation::ExternalComputation::from(
                "Post",
                deriva_core::computation::CollectArgsFn::new(|_| Some(json!({}))),
                deriva_core::computation::AsyncReturnFn::new(|result, _| Ok(result.clone())),
            )),
        );

        let mut scheduler = Scheduler::new();
        for global in schema.globals() {
            scheduler
                .register(
                    DataContext::Global {
                        key: global.key.clone(),
                    },
                    &global.computation,
                    &schema,
                )
                .unwrap();
        }

        let mut store = InMemoryStore::new();
        install(&mut store, &["Post", TASK_RECORD]);
        store.create("Post", Fields::new()).unwrap();
        store.create("Post", Fields::new()).unwrap();

        scheduler.seed_initial_values(&mut store).unwrap();
        assert_eq!(store.get_state("post_total").unwrap(), Some(json!(2)));
        assert_eq!(tasks::pending_tasks(&store).unwrap().len(), 1);
    }

    #[test]
    fn async_return_roundtrip_applies_value() {
        let mut schema = SchemaRegistry::new();
        schema.add_entity(Entity::new("Site")).unwrap();
        schema.add_global(
            "crawl_result",
            Computed::External(deriva_core::computation::ExternalComputation::from(
                "Site",
                deriva_core::computation::CollectArgsFn::new(|event| {
                    event
                        .record
                        .as_ref()
                        .and_then(|r| r.get("url"))
                        .map(|url| json!({ "url": url }))
                }),
                deriva_core::computation::AsyncReturnFn::new(|result, _args| Ok(result.clone())),
            )),
        );

        let mut scheduler = Scheduler::new();
        for global in schema.globals() {
            scheduler
                .register(
                    DataContext::Global {
                        key: global.key.clone(),
                    },
                    &global.computation,
                    &schema,
                )
                .unwrap();
        }

        let mut store = InMemoryStore::new();
        install(&mut store, &["Site", TASK_RECORD]);

        // Mutation triggers a pending task, not a value.
        let (_, events) = seeded_create(
            &scheduler,
            &mut store,
            "Site",
            fields(&[("url", json!("https://example.test"))]),
        );
        scheduler.dispatch(&mut store, events).unwrap();
        let pending = tasks::pending_tasks(&store).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(store.get_state("crawl_result").unwrap(), None);

        // External actor resolves the task directly through storage.
        let task_id = pending[0].id;
        store
            .update(
                TASK_RECORD,
                task_id,
                fields(&[
                    ("status", json!(tasks::STATUS_SUCCESS)),
                    ("result", json!("<html>")),
                ]),
            )
            .unwrap();

        // Explicit resume applies the value and consumes the task.
        scheduler.handle_async_return(&mut store, task_id).unwrap();
        assert_eq!(
            store.get_state("crawl_result").unwrap(),
            Some(json!("<html>"))
        );
        assert!(tasks::pending_tasks(&store).unwrap().is_empty());
        assert_eq!(store.get(TASK_RECORD, task_id).unwrap(), None);
    }

    #[test]
    fn unresolved_task_cannot_be_consumed() {
        let mut schema = SchemaRegistry::new();
        schema.add_entity(Entity::new("Site")).unwrap();
        schema.add_global(
            "crawl_result",
            Computed::External(deriva_core::computation::ExternalComputation::from(
                "Site",
                deriva_core::computation::CollectArgsFn::new(|_| Some(json!({}))),
                deriva_core::computation::AsyncReturnFn::new(|result, _| Ok(result.clone())),
            )),
        );
        let mut scheduler = Scheduler::new();
        scheduler
            .register(
                DataContext::Global {
                    key: "crawl_result".to_string(),
                },
                &schema.globals()[0].computation,
                &schema,
            )
            .unwrap();

        let mut store = InMemoryStore::new();
        install(&mut store, &["Site", TASK_RECORD]);
        let (_, events) = seeded_create(&scheduler, &mut store, "Site", Fields::new());
        scheduler.dispatch(&mut store, events).unwrap();
        let task_id = tasks::pending_tasks(&store).unwrap()[0].id;

        let err = scheduler.handle_async_return(&mut store, task_id).unwrap_err();
        assert!(matches!(err, SchedulerError::Task { .. }));
    }
}
