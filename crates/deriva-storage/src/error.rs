//! Storage error types for deriva-storage.
//!
//! [`StorageError`] covers all anticipated failure modes in the storage
//! layer: serialization, SQLite access, migrations, unknown record types,
//! and integrity violations.

use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// A record type was used before being installed at setup.
    #[error("unknown record type: '{name}'")]
    UnknownRecordType { name: String },

    /// A record was not found in the given record type.
    #[error("record not found: {record_name}[{id}]")]
    RecordNotFound { record_name: String, id: i64 },

    /// A data integrity violation was detected.
    #[error("integrity error: {reason}")]
    IntegrityError { reason: String },
}
