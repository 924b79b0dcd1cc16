//! Data dependency declarations.
//!
//! Each computation declares ahead of time which record types (and for
//! property-level dependencies, which attributes) it reads. The
//! declarations are consumed once, at setup, to build the dependency
//! index; they are never inspected at mutation time.

/// One declared data dependency of a computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataDep {
    /// The computation reads records of `source`. With a non-empty
    /// `attributes` list, update events only affect the computation when
    /// one of the listed attributes changed; create/delete always do.
    Records {
        source: String,
        attributes: Vec<String>,
    },
    /// The computation reads specific attributes of its host record type.
    /// Only update events touching one of the attributes affect it.
    Property {
        record: String,
        attributes: Vec<String>,
    },
}

impl DataDep {
    /// Dependency on all mutations of a record type.
    pub fn records(source: impl Into<String>) -> Self {
        DataDep::Records {
            source: source.into(),
            attributes: Vec::new(),
        }
    }

    /// Dependency on specific attributes of the host record type.
    pub fn property(record: impl Into<String>, attributes: Vec<String>) -> Self {
        DataDep::Property {
            record: record.into(),
            attributes,
        }
    }

    /// The record type this dependency watches.
    pub fn source(&self) -> &str {
        match self {
            DataDep::Records { source, .. } => source,
            DataDep::Property { record, .. } => record,
        }
    }
}
