//! Unused eager loading detection
//!
//! Each preload is held as pending until the unit of work is evaluated. An
//! association preloaded for a batch is unused when no member of the batch
//! ever read it.

use crate::ledger::AssociationLedger;
use crate::notification::Finding;
use crate::record::RecordRef;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// One preload awaiting verification
#[derive(Debug, Clone)]
pub struct PendingEagerLoad {
    pub records: Vec<RecordRef>,
    pub associations: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct UnusedEagerLoadingDetector {
    pending: Vec<PendingEagerLoad>,
}

impl UnusedEagerLoadingDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a preload of `association_names` for `records`
    pub fn register_eager_load<S: AsRef<str>>(&mut self, records: &[RecordRef], association_names: &[S]) {
        let records: Vec<RecordRef> = records.iter().filter(|r| !r.is_synthetic()).cloned().collect();
        let associations: BTreeSet<String> = association_names
            .iter()
            .map(|name| name.as_ref().to_string())
            .collect();

        if records.is_empty() || associations.is_empty() {
            trace!("Ignoring eager load with no records or no associations");
            return;
        }

        self.pending.push(PendingEagerLoad {
            records,
            associations,
        });
    }

    pub fn pending(&self) -> &[PendingEagerLoad] {
        &self.pending
    }

    /// Check every pending preload against the ledger and clear the pending list
    pub fn evaluate(&mut self, ledger: &AssociationLedger) -> Vec<Finding> {
        let mut findings = Vec::new();

        for load in self.pending.drain(..) {
            let mut by_type: BTreeMap<&str, Vec<&RecordRef>> = BTreeMap::new();
            for record in &load.records {
                by_type.entry(record.record_type()).or_default().push(record);
            }

            for (record_type, records) in by_type {
                for association in &load.associations {
                    let used = records
                        .iter()
                        .any(|record| ledger.state_of(record, association).is_accessed());
                    if !used {
                        findings.push(Finding::unused_eager_load(record_type, association.as_str()));
                    }
                }
            }
        }

        findings
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
