//! Core error types for deriva-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! all anticipated failure modes in the declarative schema model.

use thiserror::Error;

/// Core errors produced by the deriva-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Attempting to register an entity name that already exists.
    #[error("duplicate entity name: '{name}'")]
    DuplicateEntity { name: String },

    /// Attempting to register a relation name that already exists.
    #[error("duplicate relation name: '{name}'")]
    DuplicateRelation { name: String },

    /// A record type name collides with a built-in record type.
    #[error("reserved record name: '{name}'")]
    ReservedName { name: String },

    /// A relation endpoint references an entity that was never declared.
    #[error("unknown entity '{entity}' referenced by relation '{relation}'")]
    UnknownEntity { relation: String, entity: String },

    /// A relation declaration failed validation.
    #[error("invalid relation '{relation}': {reason}")]
    InvalidRelation { relation: String, reason: String },

    /// A property declaration failed validation.
    #[error("invalid property '{record}.{property}': {reason}")]
    InvalidProperty {
        record: String,
        property: String,
        reason: String,
    },
}
