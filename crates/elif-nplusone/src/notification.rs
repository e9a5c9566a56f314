//! Findings and the per-unit-of-work aggregator that deduplicates them

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::panic::Location;
use tracing::debug;

/// What kind of inefficiency a finding reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Per-record lazy reads of an association that one batched fetch would cover
    NPlusOne,
    /// Association preloaded for a batch and never read
    UnusedEagerLoad,
    /// Collection size queried without a cached counter
    MissingCounterCache,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::NPlusOne => "n_plus_one",
            FindingKind::UnusedEagerLoad => "unused_eager_load",
            FindingKind::MissingCounterCache => "missing_counter_cache",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source location of the notification that produced a finding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSite {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl CallSite {
    pub fn from_location(location: &Location<'_>) -> Self {
        Self {
            file: location.file().to_string(),
            line: location.line(),
            column: location.column(),
        }
    }

    /// Location of the caller of the `#[track_caller]` chain this is invoked from
    #[track_caller]
    pub fn caller() -> Self {
        Self::from_location(Location::caller())
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// One detected inefficiency
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub record_type: String,
    pub association: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_site: Option<CallSite>,
}

impl Finding {
    pub fn new(kind: FindingKind, record_type: impl Into<String>, association: impl Into<String>) -> Self {
        Self {
            kind,
            record_type: record_type.into(),
            association: association.into(),
            call_site: None,
        }
    }

    pub fn n_plus_one(record_type: impl Into<String>, association: impl Into<String>) -> Self {
        Self::new(FindingKind::NPlusOne, record_type, association)
    }

    pub fn unused_eager_load(record_type: impl Into<String>, association: impl Into<String>) -> Self {
        Self::new(FindingKind::UnusedEagerLoad, record_type, association)
    }

    pub fn missing_counter_cache(record_type: impl Into<String>, association: impl Into<String>) -> Self {
        Self::new(FindingKind::MissingCounterCache, record_type, association)
    }

    pub fn with_call_site(mut self, call_site: Option<CallSite>) -> Self {
        self.call_site = call_site;
        self
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FindingKind::NPlusOne => write!(
                f,
                "N+1 query detected: {} => [{}], add eager loading for '{}'",
                self.record_type, self.association, self.association
            )?,
            FindingKind::UnusedEagerLoad => write!(
                f,
                "Unused eager loading detected: {} => [{}], remove '{}' from the preload list",
                self.record_type, self.association, self.association
            )?,
            FindingKind::MissingCounterCache => write!(
                f,
                "Need counter cache: {} => [{}]",
                self.record_type, self.association
            )?,
        }
        if let Some(call_site) = &self.call_site {
            write!(f, " (at {})", call_site)?;
        }
        Ok(())
    }
}

/// Set of findings for one unit of work, in the order they were first added.
///
/// Findings are keyed by kind, record type and association. The call site
/// kept is the one from the first occurrence.
#[derive(Debug, Default)]
pub struct NotificationAggregator {
    seen: HashSet<(FindingKind, String, String)>,
    findings: Vec<Finding>,
}

impl NotificationAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a finding. Returns false if it was already present.
    pub fn add(&mut self, finding: Finding) -> bool {
        if !self.seen.insert(Self::key(&finding)) {
            return false;
        }
        debug!("{}", finding);
        self.findings.push(finding);
        true
    }

    pub fn contains(&self, finding: &Finding) -> bool {
        self.seen.contains(&Self::key(finding))
    }

    fn key(finding: &Finding) -> (FindingKind, String, String) {
        (
            finding.kind,
            finding.record_type.clone(),
            finding.association.clone(),
        )
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    /// Take the findings added since the last drain. Drained findings stay
    /// known, so adding one again is still a duplicate.
    pub fn drain(&mut self) -> Vec<Finding> {
        std::mem::take(&mut self.findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_set_like() {
        let mut aggregator = NotificationAggregator::new();
        assert!(aggregator.add(Finding::n_plus_one("Post", "author")));
        assert!(!aggregator.add(Finding::n_plus_one("Post", "author")));
        assert!(aggregator.add(Finding::unused_eager_load("Post", "author")));
        assert_eq!(aggregator.len(), 2);
    }

    #[test]
    fn test_first_call_site_is_kept() {
        let mut aggregator = NotificationAggregator::new();
        let first = CallSite {
            file: "src/a.rs".to_string(),
            line: 1,
            column: 1,
        };
        let second = CallSite {
            file: "src/b.rs".to_string(),
            line: 2,
            column: 2,
        };
        assert!(aggregator.add(Finding::missing_counter_cache("Post", "comments").with_call_site(Some(first.clone()))));
        assert!(!aggregator.add(Finding::missing_counter_cache("Post", "comments").with_call_site(Some(second))));
        assert!(aggregator.contains(&Finding::missing_counter_cache("Post", "comments")));
        assert_eq!(aggregator.findings()[0].call_site, Some(first));
    }

    #[test]
    fn test_drain_returns_in_insertion_order_and_keeps_dedup() {
        let mut aggregator = NotificationAggregator::new();
        aggregator.add(Finding::missing_counter_cache("Post", "comments"));
        aggregator.add(Finding::n_plus_one("Post", "author"));

        let drained = aggregator.drain();
        assert_eq!(
            drained,
            vec![
                Finding::missing_counter_cache("Post", "comments"),
                Finding::n_plus_one("Post", "author"),
            ]
        );
        assert!(aggregator.is_empty());
        assert!(aggregator.drain().is_empty());

        assert!(!aggregator.add(Finding::n_plus_one("Post", "author")));
        assert!(aggregator.contains(&Finding::n_plus_one("Post", "author")));
        assert!(aggregator.drain().is_empty());
    }

    #[test]
    fn test_display() {
        let finding = Finding::n_plus_one("Post", "author").with_call_site(Some(CallSite {
            file: "src/posts.rs".to_string(),
            line: 42,
            column: 9,
        }));
        assert_eq!(
            finding.to_string(),
            "N+1 query detected: Post => [author], add eager loading for 'author' (at src/posts.rs:42:9)"
        );
        assert_eq!(
            Finding::missing_counter_cache("Post", "comments").to_string(),
            "Need counter cache: Post => [comments]"
        );
    }

    #[test]
    fn test_caller_points_at_this_file() {
        let site = CallSite::caller();
        assert!(site.file.ends_with("notification.rs"));
        assert!(site.line > 0);
    }

    #[test]
    fn test_serializes_with_snake_case_kind() {
        let json = serde_json::to_value(Finding::unused_eager_load("Post", "comments")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "kind": "unused_eager_load",
                "record_type": "Post",
                "association": "comments",
            })
        );
    }
}
