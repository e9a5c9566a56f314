//! N+1 query detection
//!
//! A lazy read on an at-risk record is counted against its batch. Once
//! `threshold` distinct siblings of one batch have lazily read the same
//! association, the pattern is confirmed and reported once per
//! (record type, association) for the rest of the unit of work.

use crate::ledger::AccessState;
use crate::notification::{CallSite, Finding};
use crate::record::RecordRef;
use crate::registry::{BatchId, CandidateRegistry};
use std::collections::{HashMap, HashSet};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SiblingGroup {
    batch: BatchId,
    record_type: String,
    association: String,
}

#[derive(Debug)]
pub struct NPlusOneDetector {
    threshold: usize,
    siblings: HashMap<SiblingGroup, HashSet<RecordRef>>,
    reported: HashSet<(String, String)>,
}

impl NPlusOneDetector {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            siblings: HashMap::new(),
            reported: HashSet::new(),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Evaluate a lazy read of `association` on `record`.
    ///
    /// `prior_state` is the ledger state before this read was recorded. A
    /// read of preloaded data is served from memory and never counted.
    pub fn on_lazy_read(
        &mut self,
        registry: &CandidateRegistry,
        prior_state: AccessState,
        record: &RecordRef,
        association: &str,
        call_site: Option<CallSite>,
    ) -> Option<Finding> {
        if prior_state.is_preloaded() {
            trace!("{}.{} served from preload", record, association);
            return None;
        }

        let batch = registry.batch_of(record)?;
        let report_key = (record.record_type().to_string(), association.to_string());
        if self.reported.contains(&report_key) {
            return None;
        }

        let group = SiblingGroup {
            batch,
            record_type: record.record_type().to_string(),
            association: association.to_string(),
        };
        let readers = self.siblings.entry(group).or_default();
        readers.insert(record.clone());
        trace!(
            "{}.{} lazily read by {} of {} siblings in {}",
            record.record_type(),
            association,
            readers.len(),
            registry.batch_len(batch),
            batch
        );

        if readers.len() < self.threshold {
            return None;
        }

        self.reported.insert(report_key);
        Some(Finding::n_plus_one(record.record_type(), association).with_call_site(call_site))
    }

    pub fn has_reported(&self, record_type: &str, association: &str) -> bool {
        self.reported
            .contains(&(record_type.to_string(), association.to_string()))
    }

    pub fn clear(&mut self) {
        self.siblings.clear();
        self.reported.clear();
    }
}
