//! Unit-of-work context
//!
//! A [`UnitOfWork`] owns every piece of detection state for one request,
//! test or job. Adapters that can thread a context through their data layer
//! use it directly; the [`scope`](crate::scope) module binds one to the
//! current task or thread for adapters that cannot.

use crate::config::DetectorConfig;
use crate::detectors::{
    CounterCacheDetector, JoinCollector, NPlusOneDetector, UnusedEagerLoadingDetector,
};
use crate::ledger::{AccessState, AssociationLedger};
use crate::notification::{CallSite, Finding, NotificationAggregator};
use crate::record::RecordRef;
use crate::registry::CandidateRegistry;
use serde::Serialize;
use std::fmt;
use std::panic::Location;
use tracing::{debug, trace};
use uuid::Uuid;

/// Notification counters for one unit of work
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnitOfWorkStats {
    pub batches_loaded: usize,
    pub records_loaded: usize,
    pub eager_loads: usize,
    pub association_reads: usize,
    pub size_checks: usize,
    pub findings: usize,
}

impl fmt::Display for UnitOfWorkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} batches ({} records), {} eager loads, {} association reads, {} size checks, {} findings",
            self.batches_loaded,
            self.records_loaded,
            self.eager_loads,
            self.association_reads,
            self.size_checks,
            self.findings
        )
    }
}

/// Detection state for one logical unit of work
#[derive(Debug)]
pub struct UnitOfWork {
    id: Uuid,
    config: DetectorConfig,
    registry: CandidateRegistry,
    ledger: AssociationLedger,
    n_plus_one: NPlusOneDetector,
    unused_eager_loading: UnusedEagerLoadingDetector,
    counter_cache: CounterCacheDetector,
    aggregator: NotificationAggregator,
    stats: UnitOfWorkStats,
}

impl UnitOfWork {
    pub fn new(config: DetectorConfig) -> Self {
        let id = Uuid::new_v4();
        debug!("Unit of work {} started", id);
        Self {
            id,
            n_plus_one: NPlusOneDetector::new(*config.get_n_plus_one_threshold()),
            config,
            registry: CandidateRegistry::new(),
            ledger: AssociationLedger::new(),
            unused_eager_loading: UnusedEagerLoadingDetector::new(),
            counter_cache: CounterCacheDetector::new(),
            aggregator: NotificationAggregator::new(),
            stats: UnitOfWorkStats::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn stats(&self) -> &UnitOfWorkStats {
        &self.stats
    }

    /// A fetch returned `records`
    pub fn on_batch_loaded(&mut self, records: &[RecordRef]) {
        if records.is_empty() {
            trace!("Ignoring empty batch");
            return;
        }
        let candidates = records.iter().filter(|r| !r.is_synthetic()).count();
        if candidates > 0 {
            self.stats.batches_loaded += 1;
            self.stats.records_loaded += candidates;
        }
        self.registry.register_batch(records);
    }

    /// `association_names` were preloaded for `records` in one operation
    pub fn on_eager_load<S: AsRef<str>>(&mut self, records: &[RecordRef], association_names: &[S]) {
        let records: Vec<RecordRef> = records.iter().filter(|r| !r.is_synthetic()).cloned().collect();
        if records.is_empty() || association_names.is_empty() {
            trace!("Ignoring eager load with no records or no associations");
            return;
        }
        self.stats.eager_loads += 1;
        self.ledger.mark_preloaded(&records, association_names);
        self.unused_eager_loading
            .register_eager_load(&records, association_names);
    }

    /// `association_name` was read on `record` through the lazy loading path
    #[track_caller]
    pub fn on_association_read(&mut self, record: &RecordRef, association_name: &str) {
        self.association_read(record, association_name, Location::caller());
    }

    /// `association_name` was read on `record`, but the value was set from
    /// the other side of the association and needed no query
    pub fn on_inverse_association_read(&mut self, record: &RecordRef, association_name: &str) {
        if record.is_synthetic() {
            return;
        }
        self.stats.association_reads += 1;
        self.ledger.mark_accessed(record, association_name);
    }

    /// Lazily loading `association_name` on `owner` produced `targets`
    pub fn on_association_loaded(&mut self, owner: &RecordRef, association_name: &str, targets: &[RecordRef]) {
        if owner.is_synthetic() || targets.is_empty() {
            return;
        }
        self.registry
            .register_association_targets(owner, association_name, targets);
    }

    /// The size of a one-to-many association was queried
    #[track_caller]
    pub fn on_collection_size_check(&mut self, record: &RecordRef, association_name: &str, has_cache: bool) {
        self.collection_size_check(record, association_name, has_cache, Location::caller());
    }

    /// Start collecting associations for a joined eager load
    pub fn begin_join_materialization(&self) -> JoinCollector {
        JoinCollector::new()
    }

    /// Register everything a joined eager load materialized as preloaded
    pub fn finish_join_materialization(&mut self, collector: JoinCollector) {
        for load in collector.finish() {
            trace!(
                "Joined eager load of {:?} for {} {} records",
                load.associations,
                load.records.len(),
                load.record_type
            );
            self.on_eager_load(&load.records, &load.associations);
        }
    }

    pub fn is_at_risk(&self, record: &RecordRef) -> bool {
        self.registry.is_at_risk(record)
    }

    pub fn state_of(&self, record: &RecordRef, association_name: &str) -> AccessState {
        self.ledger.state_of(record, association_name)
    }

    /// Findings recorded so far and not yet drained
    pub fn findings(&self) -> &[Finding] {
        self.aggregator.findings()
    }

    /// Take the findings recorded so far.
    ///
    /// Unused eager loads are not evaluated here: a later read could still
    /// use the preload. They are reported by [`UnitOfWork::finish`]. A
    /// finding already drained is never returned again by this unit.
    pub fn drain(&mut self) -> Vec<Finding> {
        self.aggregator.drain()
    }

    /// End the unit of work, evaluate pending eager loads and return every
    /// finding not drained yet
    pub fn finish(mut self) -> Vec<Finding> {
        if *self.config.get_detect_unused_eager_loading() {
            for finding in self.unused_eager_loading.evaluate(&self.ledger) {
                self.record(finding);
            }
        } else {
            self.unused_eager_loading.clear();
        }
        let findings = self.aggregator.drain();
        debug!("Unit of work {} finished: {}", self.id, self.stats);
        findings
    }

    pub(crate) fn association_read(
        &mut self,
        record: &RecordRef,
        association_name: &str,
        location: &'static Location<'static>,
    ) {
        if record.is_synthetic() {
            trace!("Ignoring read of {} on synthetic record", association_name);
            return;
        }
        self.stats.association_reads += 1;
        let prior = self.ledger.mark_accessed(record, association_name);

        if !*self.config.get_detect_n_plus_one() {
            return;
        }
        let call_site = self.call_site(location);
        if let Some(finding) =
            self.n_plus_one
                .on_lazy_read(&self.registry, prior, record, association_name, call_site)
        {
            self.record(finding);
        }
    }

    pub(crate) fn collection_size_check(
        &mut self,
        record: &RecordRef,
        association_name: &str,
        has_cache: bool,
        location: &'static Location<'static>,
    ) {
        self.stats.size_checks += 1;
        if !*self.config.get_detect_counter_cache() {
            return;
        }
        let call_site = self.call_site(location);
        if let Some(finding) =
            self.counter_cache
                .note_collection_size_check(record, association_name, has_cache, call_site)
        {
            self.record(finding);
        }
    }

    fn call_site(&self, location: &Location<'_>) -> Option<CallSite> {
        (*self.config.get_capture_call_sites()).then(|| CallSite::from_location(location))
    }

    fn record(&mut self, finding: Finding) {
        if self.aggregator.add(finding) {
            self.stats.findings += 1;
        }
    }
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::FindingKind;

    fn posts(ids: &[i64]) -> Vec<RecordRef> {
        ids.iter().map(|id| RecordRef::new("Post", *id)).collect()
    }

    #[test]
    fn test_scenario_fires_after_second_read() {
        let mut unit = UnitOfWork::default();
        let batch = posts(&[1, 2, 3]);
        unit.on_batch_loaded(&batch);

        unit.on_association_read(&batch[0], "author");
        assert!(unit.findings().is_empty());

        unit.on_association_read(&batch[1], "author");
        assert_eq!(unit.findings().len(), 1);
        assert_eq!(unit.findings()[0].kind, FindingKind::NPlusOne);
        assert_eq!(unit.findings()[0].record_type, "Post");
        assert_eq!(unit.findings()[0].association, "author");
    }

    #[test]
    fn test_call_site_points_at_the_read() {
        let mut unit = UnitOfWork::default();
        let batch = posts(&[1, 2]);
        unit.on_batch_loaded(&batch);
        for post in &batch {
            unit.on_association_read(post, "author");
        }

        let site = unit.findings()[0].call_site.clone().unwrap();
        assert!(site.file.ends_with("unit_of_work.rs"));
    }

    #[test]
    fn test_call_sites_can_be_disabled() {
        let config = DetectorConfig::builder()
            .without_call_sites()
            .build_config()
            .unwrap();
        let mut unit = UnitOfWork::new(config);
        let batch = posts(&[1, 2]);
        unit.on_batch_loaded(&batch);
        unit.on_association_read(&batch[0], "author");
        unit.on_association_read(&batch[1], "author");

        assert_eq!(unit.findings()[0].call_site, None);
    }

    #[test]
    fn test_inverse_reads_count_as_use_but_not_as_queries() {
        let mut unit = UnitOfWork::default();
        let batch = posts(&[1, 2, 3]);
        unit.on_batch_loaded(&batch);
        for post in &batch {
            unit.on_inverse_association_read(post, "blog");
        }
        assert!(unit.findings().is_empty());
        assert_eq!(unit.state_of(&batch[0], "blog"), AccessState::LazilyAccessed);
    }

    #[test]
    fn test_nested_n_plus_one_through_loaded_targets() {
        let mut unit = UnitOfWork::default();
        let batch = posts(&[1, 2]);
        unit.on_batch_loaded(&batch);

        let authors = [RecordRef::new("User", 10), RecordRef::new("User", 11)];
        for (post, author) in batch.iter().zip(authors.iter()) {
            unit.on_association_read(post, "author");
            unit.on_association_loaded(post, "author", std::slice::from_ref(author));
            unit.on_association_read(author, "company");
        }

        let found: Vec<(String, String)> = unit
            .finish()
            .into_iter()
            .filter(|f| f.kind == FindingKind::NPlusOne)
            .map(|f| (f.record_type, f.association))
            .collect();
        assert_eq!(
            found,
            vec![
                ("Post".to_string(), "author".to_string()),
                ("User".to_string(), "company".to_string()),
            ]
        );
    }

    #[test]
    fn test_joined_eager_load_evaluated_over_whole_materialization() {
        let mut unit = UnitOfWork::default();
        let batch = posts(&[1, 2]);
        unit.on_batch_loaded(&batch);

        let mut collector = unit.begin_join_materialization();
        collector.note_row(&batch[0], "comments");
        collector.note_row(&batch[0], "comments");
        collector.note_row(&batch[1], "comments");
        collector.note_row(&batch[1], "tags");
        unit.finish_join_materialization(collector);

        assert_eq!(unit.state_of(&batch[1], "tags"), AccessState::Preloaded);

        // Only post 1 reads comments, which is enough for the whole batch
        unit.on_association_read(&batch[0], "comments");

        assert_eq!(unit.finish(), vec![Finding::unused_eager_load("Post", "tags")]);
    }

    #[test]
    fn test_disabled_detectors_stay_quiet() {
        let mut unit = UnitOfWork::new(DetectorConfig::disabled());
        let batch = posts(&[1, 2]);
        unit.on_batch_loaded(&batch);
        unit.on_eager_load(&batch, &["comments"]);
        unit.on_association_read(&batch[0], "author");
        unit.on_association_read(&batch[1], "author");
        unit.on_collection_size_check(&batch[0], "comments", false);

        assert!(unit.finish().is_empty());
    }

    #[test]
    fn test_stats() {
        let mut unit = UnitOfWork::default();
        let batch = posts(&[1, 2]);
        unit.on_batch_loaded(&batch);
        unit.on_batch_loaded(&[]);
        unit.on_eager_load(&batch, &["comments"]);
        unit.on_association_read(&batch[0], "comments");
        unit.on_collection_size_check(&batch[0], "comments", false);

        let stats = unit.stats().clone();
        assert_eq!(stats.batches_loaded, 1);
        assert_eq!(stats.records_loaded, 2);
        assert_eq!(stats.eager_loads, 1);
        assert_eq!(stats.association_reads, 1);
        assert_eq!(stats.size_checks, 1);
        assert_eq!(stats.findings, 1);
        assert!(stats.to_string().contains("1 batches (2 records)"));
    }

    #[test]
    fn test_stats_skip_synthetic_records() {
        let mut unit = UnitOfWork::default();
        unit.on_batch_loaded(&[RecordRef::synthetic("Report", 1), RecordRef::synthetic("Report", 2)]);
        assert_eq!(unit.stats().batches_loaded, 0);
        assert_eq!(unit.stats().records_loaded, 0);

        unit.on_batch_loaded(&[RecordRef::new("Post", 1), RecordRef::synthetic("Report", 3)]);
        assert_eq!(unit.stats().batches_loaded, 1);
        assert_eq!(unit.stats().records_loaded, 1);
    }

    #[test]
    fn test_drain_leaves_eager_loads_pending_until_finish() {
        let mut unit = UnitOfWork::default();
        let batch = posts(&[1, 2]);
        unit.on_batch_loaded(&batch);
        unit.on_eager_load(&batch, &["comments"]);

        assert!(unit.drain().is_empty());

        unit.on_association_read(&batch[0], "comments");
        assert!(unit.finish().is_empty());
    }

    #[test]
    fn test_finish_reports_unused_eager_load_once_across_drains() {
        let mut unit = UnitOfWork::default();
        let batch = posts(&[1, 2]);
        unit.on_batch_loaded(&batch);
        unit.on_eager_load(&batch, &["comments"]);
        unit.on_collection_size_check(&batch[0], "comments", false);

        assert_eq!(unit.drain().len(), 1);
        unit.on_collection_size_check(&batch[1], "comments", false);

        assert_eq!(unit.finish(), vec![Finding::unused_eager_load("Post", "comments")]);
    }
}
