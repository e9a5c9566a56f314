//! Missing counter cache detection

use crate::notification::{CallSite, Finding};
use crate::record::RecordRef;
use tracing::trace;

/// Flags size checks of one-to-many associations that had to run a live count
#[derive(Debug, Default)]
pub struct CounterCacheDetector;

impl CounterCacheDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn note_collection_size_check(
        &self,
        record: &RecordRef,
        association: &str,
        has_cache: bool,
        call_site: Option<CallSite>,
    ) -> Option<Finding> {
        if has_cache || record.is_synthetic() {
            trace!("{}.{} size check needs no counter cache", record, association);
            return None;
        }
        Some(Finding::missing_counter_cache(record.record_type(), association).with_call_site(call_site))
    }
}
