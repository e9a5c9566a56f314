//! Record identity used as the key for all per-unit-of-work bookkeeping

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// How a loaded record is identified
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordIdentity {
    /// Persisted record, keyed by its primary key rendered as a string
    Persisted(String),
    /// Unsaved record, keyed by an identity minted when the reference was built
    Transient(Uuid),
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordIdentity::Persisted(key) => write!(f, "{}", key),
            RecordIdentity::Transient(id) => write!(f, "transient:{}", id),
        }
    }
}

/// Reference to one loaded entity: record type plus identity.
///
/// Junction records (the rows of a many-to-many join table) are flagged as
/// synthetic by the adapter. Every detector ignores them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    record_type: String,
    identity: RecordIdentity,
    synthetic: bool,
}

impl RecordRef {
    /// Reference a persisted record by type and primary key
    pub fn new(record_type: impl Into<String>, primary_key: impl ToString) -> Self {
        Self {
            record_type: record_type.into(),
            identity: RecordIdentity::Persisted(primary_key.to_string()),
            synthetic: false,
        }
    }

    /// Reference a record that has no primary key yet
    pub fn transient(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            identity: RecordIdentity::Transient(Uuid::new_v4()),
            synthetic: false,
        }
    }

    /// Reference a junction-table record
    pub fn synthetic(record_type: impl Into<String>, primary_key: impl ToString) -> Self {
        Self {
            synthetic: true,
            ..Self::new(record_type, primary_key)
        }
    }

    /// Mark or unmark this reference as a junction record
    pub fn with_synthetic(mut self, synthetic: bool) -> Self {
        self.synthetic = synthetic;
        self
    }

    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    pub fn identity(&self) -> &RecordIdentity {
        &self.identity
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    /// Key for association `name` on this record
    pub fn association(&self, name: impl Into<String>) -> AssociationKey {
        AssociationKey::new(self.clone(), name)
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.record_type, self.identity)
    }
}

/// "Association `name` on record `record`"
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssociationKey {
    pub record: RecordRef,
    pub name: String,
}

impl AssociationKey {
    pub fn new(record: RecordRef, name: impl Into<String>) -> Self {
        Self {
            record,
            name: name.into(),
        }
    }
}

impl fmt::Display for AssociationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.record, self.name)
    }
}
