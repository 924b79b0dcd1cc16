//! The declarative schema: entities, relations, properties, globals.
//!
//! [`SchemaRegistry`] is the single container for everything declared
//! before setup. It is an explicit, dependency-injected object -- there are
//! no process-wide instance registries -- so multiple independent
//! controllers can coexist in one process. Declarations are append-only
//! and frozen once a controller materializes them; the registry enforces
//! name uniqueness and endpoint validity at insertion time.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::computation::{Computed, DefaultFn};
use crate::error::CoreError;

/// Built-in record type journaling interaction calls.
pub const INTERACTION_RECORD: &str = "_interaction";
/// Built-in record type holding outstanding async computation tasks.
pub const TASK_RECORD: &str = "_task";

/// Which side of a relation a record occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationSide {
    Source,
    Target,
}

impl RelationSide {
    /// The relation-record field holding this side's record id.
    pub fn field_name(self) -> &'static str {
        match self {
            RelationSide::Source => crate::record::SOURCE_FIELD,
            RelationSide::Target => crate::record::TARGET_FIELD,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            RelationSide::Source => RelationSide::Target,
            RelationSide::Target => RelationSide::Source,
        }
    }
}

/// Relation cardinality between source and target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

/// Semantic type of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Number,
    Boolean,
    Json,
}

/// One declared property of an entity or relation.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub prop_type: PropertyType,
    /// Pre-computation default value factory.
    pub default: Option<DefaultFn>,
    /// At most one computation; supersedes the default once data exists.
    pub computation: Option<Computed>,
}

impl Property {
    pub fn new(name: impl Into<String>, prop_type: PropertyType) -> Self {
        Property {
            name: name.into(),
            prop_type,
            default: None,
            computation: None,
        }
    }

    pub fn with_default(mut self, default: DefaultFn) -> Self {
        self.default = Some(default);
        self
    }

    /// Declares a computed property in one step.
    pub fn computed(
        name: impl Into<String>,
        prop_type: PropertyType,
        computation: Computed,
    ) -> Self {
        Property {
            name: name.into(),
            prop_type,
            default: None,
            computation: Some(computation),
        }
    }
}

/// A named record type with an ordered list of properties.
///
/// Entities never change shape at runtime; properties can only be appended
/// before setup.
#[derive(Debug, Clone)]
pub struct Entity {
    pub name: String,
    pub properties: Vec<Property>,
    /// An entity-scoped computation deriving this record set (Transform,
    /// MapRecordMutation).
    pub computation: Option<Computed>,
}

impl Entity {
    pub fn new(name: impl Into<String>) -> Self {
        Entity {
            name: name.into(),
            properties: Vec::new(),
            computation: None,
        }
    }

    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_computation(mut self, computation: Computed) -> Self {
        self.computation = Some(computation);
        self
    }
}

/// A named, typed association between two entities. Relation records carry
/// `source`/`target` id fields plus any declared edge properties.
#[derive(Debug, Clone)]
pub struct Relation {
    pub name: String,
    /// Source entity name.
    pub source: String,
    /// Property name exposed on the source entity for this relation.
    pub source_property: String,
    /// Target entity name.
    pub target: String,
    /// Property name exposed on the target entity for this relation.
    pub target_property: String,
    pub cardinality: Cardinality,
    /// Edge attributes.
    pub properties: Vec<Property>,
    pub computation: Option<Computed>,
}

impl Relation {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        source_property: impl Into<String>,
        target: impl Into<String>,
        target_property: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        Relation {
            name: name.into(),
            source: source.into(),
            source_property: source_property.into(),
            target: target.into(),
            target_property: target_property.into(),
            cardinality,
            properties: Vec::new(),
            computation: None,
        }
    }

    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_computation(mut self, computation: Computed) -> Self {
        self.computation = Some(computation);
        self
    }

    /// The entity name occupying the given side.
    pub fn entity_on(&self, side: RelationSide) -> &str {
        match side {
            RelationSide::Source => &self.source,
            RelationSide::Target => &self.target,
        }
    }
}

/// A global derived value stored in the state table.
#[derive(Debug, Clone)]
pub struct GlobalItem {
    pub key: String,
    pub computation: Computed,
}

/// The container for all declared entities, relations, and globals.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    entities: IndexMap<String, Entity>,
    relations: IndexMap<String, Relation>,
    globals: Vec<GlobalItem>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        SchemaRegistry::default()
    }

    /// Registers an entity. Names must be unique and must not collide with
    /// built-in record types.
    pub fn add_entity(&mut self, entity: Entity) -> Result<(), CoreError> {
        if entity.name.starts_with('_') {
            return Err(CoreError::ReservedName { name: entity.name });
        }
        if self.entities.contains_key(&entity.name) || self.relations.contains_key(&entity.name) {
            return Err(CoreError::DuplicateEntity { name: entity.name });
        }
        self.entities.insert(entity.name.clone(), entity);
        Ok(())
    }

    /// Registers a relation. Both endpoints must already be declared.
    pub fn add_relation(&mut self, relation: Relation) -> Result<(), CoreError> {
        if relation.name.starts_with('_') {
            return Err(CoreError::ReservedName {
                name: relation.name,
            });
        }
        if self.relations.contains_key(&relation.name)
            || self.entities.contains_key(&relation.name)
        {
            return Err(CoreError::DuplicateRelation {
                name: relation.name,
            });
        }
        for endpoint in [&relation.source, &relation.target] {
            if !self.entities.contains_key(endpoint) {
                return Err(CoreError::UnknownEntity {
                    relation: relation.name.clone(),
                    entity: endpoint.clone(),
                });
            }
        }
        if relation.source_property.is_empty() || relation.target_property.is_empty() {
            return Err(CoreError::InvalidRelation {
                relation: relation.name,
                reason: "both side properties must be named".to_string(),
            });
        }
        self.relations.insert(relation.name.clone(), relation);
        Ok(())
    }

    /// Registers a global computed value under a state key.
    pub fn add_global(&mut self, key: impl Into<String>, computation: Computed) {
        self.globals.push(GlobalItem {
            key: key.into(),
            computation,
        });
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.get(name)
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    pub fn globals(&self) -> &[GlobalItem] {
        &self.globals
    }

    pub fn is_relation(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    /// All record type names this schema materializes, built-ins included.
    pub fn record_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entities.keys().cloned().collect();
        names.extend(self.relations.keys().cloned());
        names.push(INTERACTION_RECORD.to_string());
        names.push(TASK_RECORD.to_string());
        names
    }

    /// Looks up the declared properties of an entity or relation.
    pub fn properties_of(&self, record_name: &str) -> Option<&[Property]> {
        if let Some(entity) = self.entities.get(record_name) {
            return Some(&entity.properties);
        }
        self.relations.get(record_name).map(|r| r.properties.as_slice())
    }
}
