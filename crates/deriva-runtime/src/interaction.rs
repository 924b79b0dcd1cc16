//! Interaction declarations: the named user actions that trigger
//! mutation batches.
//!
//! The permission and payload-validation layer proper is an external
//! collaborator; what lives here is its interface seam. An interaction
//! carries an optional `condition` hook (the permission check point) and
//! an optional `effect` producing the storage operations the call
//! performs. Every accepted call is journaled as a `_interaction` record,
//! which is what interaction-triggered computations (state machine
//! triggers, transforms over interactions) key off.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use deriva_core::event::MutationEvent;
use deriva_core::id::RecordId;
use deriva_core::record::Fields;
use deriva_core::schema::RelationSide;
use deriva_storage::RecordStore;

use crate::error::RuntimeError;

/// The caller identity and payload of one interaction call.
#[derive(Debug, Clone)]
pub struct InteractionArgs {
    pub user: Value,
    pub payload: Value,
}

impl InteractionArgs {
    pub fn new(user: Value, payload: Value) -> Self {
        InteractionArgs { user, payload }
    }
}

/// A relation edge created together with a new record.
#[derive(Debug, Clone)]
pub struct LinkSpec {
    /// Relation record type to create.
    pub relation: String,
    /// Which side of the relation the NEW record occupies.
    pub side: RelationSide,
    /// The record on the opposite side.
    pub other: RecordId,
    /// Edge attributes.
    pub fields: Fields,
}

/// One storage operation requested by an interaction effect.
#[derive(Debug, Clone)]
pub enum StorageOp {
    /// Create a record, optionally linking it through relations. The
    /// relation events carry the entity create as their related event.
    Create {
        record_name: String,
        fields: Fields,
        links: Vec<LinkSpec>,
    },
    /// Merge fields into an existing record.
    Update {
        record_name: String,
        id: RecordId,
        fields: Fields,
    },
    /// Remove a record.
    Delete { record_name: String, id: RecordId },
}

impl StorageOp {
    pub fn create(record_name: impl Into<String>, fields: Fields) -> Self {
        StorageOp::Create {
            record_name: record_name.into(),
            fields,
            links: Vec::new(),
        }
    }

    pub fn create_linked(
        record_name: impl Into<String>,
        fields: Fields,
        links: Vec<LinkSpec>,
    ) -> Self {
        StorageOp::Create {
            record_name: record_name.into(),
            fields,
            links,
        }
    }

    pub fn update(record_name: impl Into<String>, id: RecordId, fields: Fields) -> Self {
        StorageOp::Update {
            record_name: record_name.into(),
            id,
            fields,
        }
    }

    pub fn delete(record_name: impl Into<String>, id: RecordId) -> Self {
        StorageOp::Delete {
            record_name: record_name.into(),
            id,
        }
    }
}

/// Permission-check hook. Errors and `false` both reject the call.
#[derive(Clone)]
pub struct GuardFn(Arc<dyn Fn(&InteractionArgs) -> Result<bool, String> + Send + Sync>);

impl GuardFn {
    pub fn new(f: impl Fn(&InteractionArgs) -> Result<bool, String> + Send + Sync + 'static) -> Self {
        GuardFn(Arc::new(f))
    }

    pub fn eval(&self, args: &InteractionArgs) -> Result<bool, String> {
        (self.0)(args)
    }
}

impl fmt::Debug for GuardFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GuardFn(..)")
    }
}

/// Produces the storage operations an accepted call performs. Receives
/// read access to storage for lookups (resolving payload references).
#[derive(Clone)]
pub struct EffectFn(
    Arc<dyn Fn(&InteractionArgs, &dyn RecordStore) -> Result<Vec<StorageOp>, String> + Send + Sync>,
);

impl EffectFn {
    pub fn new(
        f: impl Fn(&InteractionArgs, &dyn RecordStore) -> Result<Vec<StorageOp>, String>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        EffectFn(Arc::new(f))
    }

    pub fn eval(
        &self,
        args: &InteractionArgs,
        store: &dyn RecordStore,
    ) -> Result<Vec<StorageOp>, String> {
        (self.0)(args, store)
    }
}

impl fmt::Debug for EffectFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EffectFn(..)")
    }
}

/// One declared interaction, addressable by name or UUID.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub name: String,
    pub uuid: Uuid,
    pub condition: Option<GuardFn>,
    pub effect: Option<EffectFn>,
}

impl Interaction {
    pub fn new(name: impl Into<String>) -> Self {
        Interaction {
            name: name.into(),
            uuid: Uuid::new_v4(),
            condition: None,
            effect: None,
        }
    }

    pub fn with_condition(mut self, condition: GuardFn) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_effect(mut self, effect: EffectFn) -> Self {
        self.effect = Some(effect);
        self
    }
}

/// What an interaction call returns: the error, or the full list of
/// mutation events the call committed (batch plus cascade).
#[derive(Debug)]
pub struct InteractionResult {
    pub error: Option<RuntimeError>,
    pub effects: Vec<MutationEvent>,
}

impl InteractionResult {
    pub(crate) fn ok(effects: Vec<MutationEvent>) -> Self {
        InteractionResult {
            error: None,
            effects,
        }
    }

    pub(crate) fn failed(error: RuntimeError) -> Self {
        InteractionResult {
            error: Some(error),
            effects: Vec::new(),
        }
    }

    /// True when the call was accepted and fully propagated.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
