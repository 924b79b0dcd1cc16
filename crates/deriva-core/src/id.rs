//! Stable ID newtypes for records and registered computations.
//!
//! All IDs are distinct newtype wrappers, providing type safety so that a
//! `RecordId` cannot be accidentally used where a `ComputationId` is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable record identifier, assigned by the storage layer on create.
///
/// The inner `i64` aligns with SQLite's `INTEGER PRIMARY KEY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub i64);

/// Identity of a registered computation, assigned in declaration order by
/// the scheduler. Ordering by `ComputationId` is ordering by declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComputationId(pub u32);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ComputationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
