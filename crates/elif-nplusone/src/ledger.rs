//! Association ledger - per-record log of preloaded and accessed associations

use crate::record::{AssociationKey, RecordRef};
use std::collections::HashMap;

/// Access state of one association on one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessState {
    /// No notification seen yet
    #[default]
    Unknown,
    /// Fetched by a batch preload and not read since
    Preloaded,
    /// Read without having been preloaded
    LazilyAccessed,
    /// Preloaded and read
    Both,
}

impl AccessState {
    fn preload(self) -> Self {
        match self {
            AccessState::Unknown | AccessState::Preloaded => AccessState::Preloaded,
            AccessState::LazilyAccessed | AccessState::Both => AccessState::Both,
        }
    }

    fn access(self) -> Self {
        match self {
            AccessState::Unknown | AccessState::LazilyAccessed => AccessState::LazilyAccessed,
            AccessState::Preloaded | AccessState::Both => AccessState::Both,
        }
    }

    /// Whether the association data came from a batch preload
    pub fn is_preloaded(self) -> bool {
        matches!(self, AccessState::Preloaded | AccessState::Both)
    }

    /// Whether anything read the association
    pub fn is_accessed(self) -> bool {
        matches!(self, AccessState::LazilyAccessed | AccessState::Both)
    }
}

/// Per-record association states for one unit of work
#[derive(Debug, Default)]
pub struct AssociationLedger {
    states: HashMap<AssociationKey, AccessState>,
}

impl AssociationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every record × association pair as preloaded
    pub fn mark_preloaded<S: AsRef<str>>(&mut self, records: &[RecordRef], association_names: &[S]) {
        for record in records {
            for name in association_names {
                self.transition(record, name.as_ref(), AccessState::preload);
            }
        }
    }

    /// Mark one association on one record as read. Returns the state before the read.
    pub fn mark_accessed(&mut self, record: &RecordRef, association_name: &str) -> AccessState {
        self.transition(record, association_name, AccessState::access)
    }

    pub fn state_of(&self, record: &RecordRef, association_name: &str) -> AccessState {
        self.states
            .get(&AssociationKey::new(record.clone(), association_name))
            .copied()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    fn transition(
        &mut self,
        record: &RecordRef,
        association_name: &str,
        next: fn(AccessState) -> AccessState,
    ) -> AccessState {
        let state = self
            .states
            .entry(AssociationKey::new(record.clone(), association_name))
            .or_default();
        let previous = *state;
        *state = next(previous);
        previous
    }
}
