//! Collects associations materialized through a joined eager load
//!
//! A joined query yields one row per (parent, child) pair, so association
//! data for a parent arrives spread over many rows. The collector gathers
//! every pair across the whole result set and only then hands them over as
//! preloads, grouped by record type.

use crate::record::RecordRef;
use std::collections::{BTreeSet, HashMap};

/// Preloads for one record type produced by a joined materialization
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedEagerLoad {
    pub record_type: String,
    pub records: Vec<RecordRef>,
    pub associations: Vec<String>,
}

#[derive(Debug, Default)]
pub struct JoinCollector {
    order: Vec<RecordRef>,
    associations: HashMap<RecordRef, BTreeSet<String>>,
}

impl JoinCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that a row populated `association` on `record`
    pub fn note_row(&mut self, record: &RecordRef, association: impl Into<String>) {
        if record.is_synthetic() {
            return;
        }
        if !self.associations.contains_key(record) {
            self.order.push(record.clone());
        }
        self.associations
            .entry(record.clone())
            .or_default()
            .insert(association.into());
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Associations collected for one record, in name order
    pub fn associations_of(&self, record: &RecordRef) -> Vec<String> {
        self.associations
            .get(record)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Group the collected pairs by record type. Records keep the order they
    /// were first seen in; each group carries the union of associations.
    pub fn finish(self) -> Vec<JoinedEagerLoad> {
        let JoinCollector {
            order,
            mut associations,
        } = self;
        let mut groups: Vec<(String, Vec<RecordRef>, BTreeSet<String>)> = Vec::new();

        for record in order {
            let names = associations.remove(&record).unwrap_or_default();
            match groups
                .iter_mut()
                .find(|(ty, _, _)| ty.as_str() == record.record_type())
            {
                Some((_, records, union)) => {
                    union.extend(names);
                    records.push(record);
                }
                None => {
                    groups.push((record.record_type().to_string(), vec![record], names));
                }
            }
        }

        groups
            .into_iter()
            .map(|(record_type, records, associations)| JoinedEagerLoad {
                record_type,
                records,
                associations: associations.into_iter().collect(),
            })
            .collect()
    }
}
