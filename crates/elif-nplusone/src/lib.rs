//! # elif-nplusone
//!
//! Detects inefficient data access in the elif.rs data layer:
//!
//! - **N+1 queries**: sibling records loaded by one fetch each triggering
//!   their own query for the same association
//! - **Unused eager loading**: associations preloaded for a batch that
//!   nothing reads
//! - **Missing counter caches**: collection sizes counted with a live query
//!
//! The crate only observes. An instrumentation adapter reports what the
//! data layer does through notification calls, and the findings for one
//! unit of work (request, test or job) are handed back when it ends.
//! Rendering findings and allow-listing false positives are left to the
//! adapter.
//!
//! ## Quick Start
//!
//! ```rust
//! use elif_nplusone::{scope, FindingKind, RecordRef};
//!
//! scope::begin_unit_of_work();
//!
//! let posts = vec![RecordRef::new("Post", 1), RecordRef::new("Post", 2)];
//! scope::on_batch_loaded(&posts);
//! for post in &posts {
//!     scope::on_association_read(post, "author");
//! }
//!
//! let findings = scope::end_unit_of_work().unwrap();
//! assert_eq!(findings.len(), 1);
//! assert_eq!(findings[0].kind, FindingKind::NPlusOne);
//! ```

pub mod config;
pub mod detectors;
pub mod error;
pub mod ledger;
pub mod notification;
pub mod record;
pub mod registry;
pub mod scope;
pub mod unit_of_work;

pub use config::DetectorConfig;
pub use detectors::{JoinCollector, JoinedEagerLoad};
pub use error::{ConfigError, ConfigResult, DetectorError, DetectorResult};
pub use ledger::{AccessState, AssociationLedger};
pub use notification::{CallSite, Finding, FindingKind, NotificationAggregator};
pub use record::{AssociationKey, RecordIdentity, RecordRef};
pub use registry::{BatchId, CandidateRegistry};
pub use unit_of_work::{UnitOfWork, UnitOfWorkStats};
