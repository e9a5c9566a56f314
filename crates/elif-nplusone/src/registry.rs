//! Candidate registry - which loaded records can take part in an N+1 pattern
//!
//! A record loaded together with siblings is *at risk*: if code then walks
//! the siblings and reads the same association on each, every read is a
//! separate query. A record loaded on its own is *safe*, since there is
//! nothing to batch it with. The most recent load of a record decides which
//! of the two it is.

use crate::record::RecordRef;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::trace;

/// Identifies the records returned together by one fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

/// Tracks at-risk and safe records for one unit of work
#[derive(Debug, Default)]
pub struct CandidateRegistry {
    at_risk: HashMap<RecordRef, BatchId>,
    safe: HashSet<RecordRef>,
    batch_sizes: HashMap<BatchId, usize>,
    /// Batches of association targets, keyed by the owners' batch and association
    derived: HashMap<(BatchId, String), BatchId>,
    next_id: u64,
}

impl CandidateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the records returned by one fetch.
    ///
    /// More than one record opens a fresh batch and marks every member at
    /// risk. Exactly one record marks it safe. Synthetic records are skipped
    /// and do not count toward the batch size.
    pub fn register_batch(&mut self, records: &[RecordRef]) -> Option<BatchId> {
        let members: Vec<&RecordRef> = records.iter().filter(|r| !r.is_synthetic()).collect();

        match members.as_slice() {
            [] => {
                trace!("Ignoring batch with no candidate records ({} given)", records.len());
                None
            }
            [single] => {
                self.mark_safe(single);
                None
            }
            _ => {
                let batch = self.open_batch();
                for record in members {
                    self.join(batch, record);
                }
                trace!("Registered {} with {} records", batch, self.batch_len(batch));
                Some(batch)
            }
        }
    }

    /// Register records produced by loading `association` on `owner`.
    ///
    /// Targets reached from at-risk owners of one batch become siblings of a
    /// shared derived batch, so a repeated read one level deeper is caught.
    /// Targets of any other owner are registered like a plain fetch.
    pub fn register_association_targets(
        &mut self,
        owner: &RecordRef,
        association: &str,
        targets: &[RecordRef],
    ) -> Option<BatchId> {
        let Some(owner_batch) = self.batch_of(owner) else {
            return self.register_batch(targets);
        };

        let key = (owner_batch, association.to_string());
        let batch = match self.derived.get(&key) {
            Some(batch) => *batch,
            None => {
                let batch = self.open_batch();
                self.derived.insert(key, batch);
                batch
            }
        };

        for target in targets.iter().filter(|t| !t.is_synthetic()) {
            self.join(batch, target);
        }
        Some(batch)
    }

    pub fn is_at_risk(&self, record: &RecordRef) -> bool {
        self.at_risk.contains_key(record)
    }

    pub fn is_safe(&self, record: &RecordRef) -> bool {
        self.safe.contains(record)
    }

    /// Batch the record currently belongs to, if it is at risk
    pub fn batch_of(&self, record: &RecordRef) -> Option<BatchId> {
        self.at_risk.get(record).copied()
    }

    /// Number of records currently in `batch`
    pub fn batch_len(&self, batch: BatchId) -> usize {
        self.batch_sizes.get(&batch).copied().unwrap_or(0)
    }

    pub fn at_risk_count(&self) -> usize {
        self.at_risk.len()
    }

    pub fn clear(&mut self) {
        self.at_risk.clear();
        self.safe.clear();
        self.batch_sizes.clear();
        self.derived.clear();
    }

    fn open_batch(&mut self) -> BatchId {
        self.next_id += 1;
        BatchId(self.next_id)
    }

    fn join(&mut self, batch: BatchId, record: &RecordRef) {
        self.safe.remove(record);
        if let Some(previous) = self.at_risk.insert(record.clone(), batch) {
            if previous == batch {
                return;
            }
            if let Some(size) = self.batch_sizes.get_mut(&previous) {
                *size = size.saturating_sub(1);
            }
        }
        *self.batch_sizes.entry(batch).or_insert(0) += 1;
    }

    fn mark_safe(&mut self, record: &RecordRef) {
        if let Some(previous) = self.at_risk.remove(record) {
            if let Some(size) = self.batch_sizes.get_mut(&previous) {
                *size = size.saturating_sub(1);
            }
        }
        self.safe.insert(record.clone());
    }
}
