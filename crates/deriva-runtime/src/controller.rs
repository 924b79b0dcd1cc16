//! The controller: the single coordinator wiring schema, storage, and
//! the scheduler.
//!
//! All business logic flows through [`Controller`]: `setup` materializes
//! the schema and registers every declared computation,
//! `call_interaction` journals and executes a user action then propagates
//! its mutation batch, and `handle_async_return` resumes externally
//! resolved computations. Batches are processed to completion before the
//! next call is accepted -- `&mut self` is the serialization mechanism;
//! storage is the only shared mutable resource.

use serde_json::{json, Value};
use uuid::Uuid;

use deriva_core::computation::DataContext;
use deriva_core::event::MutationEvent;
use deriva_core::id::RecordId;
use deriva_core::record::{Fields, Record};
use deriva_core::schema::{SchemaRegistry, INTERACTION_RECORD};
use deriva_engine::scheduler::Scheduler;
use deriva_storage::{MatchExpr, Modifier, RecordStore};

use crate::error::RuntimeError;
use crate::interaction::{Interaction, InteractionArgs, InteractionResult, StorageOp};

/// The orchestration boundary of a deriva application.
pub struct Controller {
    schema: SchemaRegistry,
    store: Box<dyn RecordStore>,
    scheduler: Scheduler,
    interactions: Vec<Interaction>,
    ready: bool,
}

impl Controller {
    /// Builds a controller over an explicit schema registry and storage
    /// backend. Nothing is materialized until [`Controller::setup`].
    pub fn new(schema: SchemaRegistry, store: Box<dyn RecordStore>) -> Self {
        Controller {
            schema,
            store,
            scheduler: Scheduler::new(),
            interactions: Vec::new(),
            ready: false,
        }
    }

    /// Registers an interaction. Returns its UUID, which addresses it in
    /// `call_interaction` interchangeably with the name.
    pub fn register_interaction(
        &mut self,
        interaction: Interaction,
    ) -> Result<Uuid, RuntimeError> {
        if self.interactions.iter().any(|i| i.name == interaction.name) {
            return Err(RuntimeError::DuplicateInteraction {
                name: interaction.name,
            });
        }
        let uuid = interaction.uuid;
        self.interactions.push(interaction);
        Ok(uuid)
    }

    /// Materializes the schema and registers all declared computations.
    ///
    /// `install: true` creates record types from scratch; `install:
    /// false` assumes an existing installation and verifies it. Global
    /// computations are seeded by full compute in both modes; per-record
    /// property values of pre-existing data are trusted as-is.
    pub fn setup(&mut self, install: bool) -> Result<(), RuntimeError> {
        if install {
            for name in self.schema.record_names() {
                self.store.install_record_type(&name)?;
            }
        } else {
            for name in self.schema.record_names() {
                if !self.store.has_record_type(&name) {
                    return Err(RuntimeError::SchemaNotInstalled { record: name });
                }
            }
        }

        let mut scheduler = Scheduler::new();

        // Declared property defaults, evaluated per create.
        for entity in self.schema.entities() {
            for property in &entity.properties {
                if let Some(default) = &property.default {
                    scheduler.register_property_default(
                        entity.name.clone(),
                        property.name.clone(),
                        default.clone(),
                    );
                }
            }
        }
        for relation in self.schema.relations() {
            for property in &relation.properties {
                if let Some(default) = &property.default {
                    scheduler.register_property_default(
                        relation.name.clone(),
                        property.name.clone(),
                        default.clone(),
                    );
                }
            }
        }

        // Computations, in declaration order: globals, then entities and
        // their properties, then relations and theirs.
        for global in self.schema.globals() {
            scheduler.register(
                DataContext::Global {
                    key: global.key.clone(),
                },
                &global.computation,
                &self.schema,
            )?;
        }
        for entity in self.schema.entities() {
            if let Some(computation) = &entity.computation {
                scheduler.register(
                    DataContext::Entity {
                        name: entity.name.clone(),
                    },
                    computation,
                    &self.schema,
                )?;
            }
            for property in &entity.properties {
                if let Some(computation) = &property.computation {
                    scheduler.register(
                        DataContext::Property {
                            host: entity.name.clone(),
                            attribute: property.name.clone(),
                        },
                        computation,
                        &self.schema,
                    )?;
                }
            }
        }
        for relation in self.schema.relations() {
            if let Some(computation) = &relation.computation {
                scheduler.register(
                    DataContext::Relation {
                        name: relation.name.clone(),
                    },
                    computation,
                    &self.schema,
                )?;
            }
            for property in &relation.properties {
                if let Some(computation) = &property.computation {
                    scheduler.register(
                        DataContext::Property {
                            host: relation.name.clone(),
                            attribute: property.name.clone(),
                        },
                        computation,
                        &self.schema,
                    )?;
                }
            }
        }

        scheduler.seed_initial_values(self.store.as_mut())?;
        self.scheduler = scheduler;
        self.ready = true;
        tracing::info!(
            "setup complete: {} computation(s) registered",
            self.scheduler.computation_count()
        );
        Ok(())
    }

    /// Calls an interaction by name or UUID. Errors come back in
    /// `result.error`; committed cascade writes from before a failure
    /// remain (the storage transaction boundary is the rollback
    /// mechanism).
    pub fn call_interaction(
        &mut self,
        name_or_uuid: &str,
        args: InteractionArgs,
    ) -> InteractionResult {
        match self.try_call(name_or_uuid, args) {
            Ok(effects) => InteractionResult::ok(effects),
            Err(error) => InteractionResult::failed(error),
        }
    }

    fn try_call(
        &mut self,
        name_or_uuid: &str,
        args: InteractionArgs,
    ) -> Result<Vec<MutationEvent>, RuntimeError> {
        if !self.ready {
            return Err(RuntimeError::NotSetup);
        }
        let interaction = self
            .interactions
            .iter()
            .find(|i| i.name == name_or_uuid || i.uuid.to_string() == name_or_uuid)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownInteraction {
                name: name_or_uuid.to_string(),
            })?;

        if let Some(condition) = &interaction.condition {
            match condition.eval(&args) {
                Ok(true) => {}
                Ok(false) => {
                    return Err(RuntimeError::ConditionRejected {
                        interaction: interaction.name.clone(),
                        reason: "condition returned false".to_string(),
                    });
                }
                Err(reason) => {
                    return Err(RuntimeError::ConditionRejected {
                        interaction: interaction.name.clone(),
                        reason,
                    });
                }
            }
        }

        // Journal the call; interaction-triggered computations key off
        // this record.
        let mut journal = Fields::new();
        journal.insert("name".to_string(), json!(interaction.name));
        journal.insert("uuid".to_string(), json!(interaction.uuid.to_string()));
        journal.insert("user".to_string(), args.user.clone());
        journal.insert("payload".to_string(), args.payload.clone());
        let (_, mut batch) = self.store.create(INTERACTION_RECORD, journal)?;

        if let Some(effect) = &interaction.effect {
            let ops = effect.eval(&args, self.store.as_ref()).map_err(|reason| {
                RuntimeError::EffectFailed {
                    interaction: interaction.name.clone(),
                    reason,
                }
            })?;
            batch.extend(self.execute_ops(ops)?);
        }

        let summary = self.scheduler.dispatch(self.store.as_mut(), batch.clone())?;
        tracing::debug!(
            "interaction '{}': {} event(s), {} computation run(s)",
            interaction.name,
            summary.events_processed,
            summary.computations_run
        );
        let mut effects = batch;
        effects.extend(summary.derived);
        Ok(effects)
    }

    /// Applies system-level storage operations (outside any interaction)
    /// and propagates the resulting batch.
    pub fn apply(&mut self, ops: Vec<StorageOp>) -> Result<Vec<MutationEvent>, RuntimeError> {
        if !self.ready {
            return Err(RuntimeError::NotSetup);
        }
        let batch = self.execute_ops(ops)?;
        let summary = self.scheduler.dispatch(self.store.as_mut(), batch.clone())?;
        let mut effects = batch;
        effects.extend(summary.derived);
        Ok(effects)
    }

    /// Consumes a resolved async task record, applying its value and
    /// propagating the resulting events.
    pub fn handle_async_return(
        &mut self,
        task: RecordId,
    ) -> Result<Vec<MutationEvent>, RuntimeError> {
        if !self.ready {
            return Err(RuntimeError::NotSetup);
        }
        let summary = self.scheduler.handle_async_return(self.store.as_mut(), task)?;
        Ok(summary.derived)
    }

    /// Executes storage ops, seeding declared and computed defaults on
    /// creates and chaining relation events to their causing entity
    /// event.
    fn execute_ops(&mut self, ops: Vec<StorageOp>) -> Result<Vec<MutationEvent>, RuntimeError> {
        let mut events = Vec::new();
        for op in ops {
            match op {
                StorageOp::Create {
                    record_name,
                    mut fields,
                    links,
                } => {
                    self.scheduler.seed_record_fields(&record_name, &mut fields);
                    let (record, mut created) = self.store.create(&record_name, fields)?;
                    let parent = created.first().cloned().ok_or_else(|| {
                        RuntimeError::Storage(deriva_storage::StorageError::IntegrityError {
                            reason: format!("create of '{record_name}' emitted no event"),
                        })
                    })?;
                    events.append(&mut created);
                    for link in links {
                        let mut link_fields = link.fields;
                        link_fields.insert(
                            link.side.field_name().to_string(),
                            json!(record.id.0),
                        );
                        link_fields.insert(
                            link.side.opposite().field_name().to_string(),
                            json!(link.other.0),
                        );
                        self.scheduler
                            .seed_record_fields(&link.relation, &mut link_fields);
                        let (_, link_events) = self.store.create(&link.relation, link_fields)?;
                        for event in link_events {
                            events.push(event.with_related(parent.clone()));
                        }
                    }
                }
                StorageOp::Update {
                    record_name,
                    id,
                    fields,
                } => events.extend(self.store.update(&record_name, id, fields)?),
                StorageOp::Delete { record_name, id } => {
                    events.extend(self.store.delete(&record_name, id)?);
                }
            }
        }
        Ok(events)
    }

    // -------------------------------------------------------------------
    // Read access
    // -------------------------------------------------------------------

    /// Fetches one record.
    pub fn record(&self, record_name: &str, id: RecordId) -> Result<Option<Record>, RuntimeError> {
        Ok(self.store.get(record_name, id)?)
    }

    /// Finds records matching the expression.
    pub fn find(
        &self,
        record_name: &str,
        expr: &MatchExpr,
    ) -> Result<Vec<Record>, RuntimeError> {
        Ok(self.store.find(record_name, expr, &Modifier::none())?)
    }

    /// Reads a global computed value.
    pub fn global(&self, key: &str) -> Result<Option<Value>, RuntimeError> {
        Ok(self.store.get_state(key)?)
    }

    /// Async tasks still awaiting external resolution.
    pub fn pending_tasks(&self) -> Result<Vec<Record>, RuntimeError> {
        Ok(deriva_engine::tasks::pending_tasks(self.store.as_ref())?)
    }

    /// The declared schema.
    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Direct storage access, for external actors resolving tasks.
    pub fn store_mut(&mut self) -> &mut dyn RecordStore {
        self.store.as_mut()
    }
}
