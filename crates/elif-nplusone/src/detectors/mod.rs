//! Detectors that turn ledger and registry state into findings

pub mod counter_cache;
pub mod join_collector;
pub mod n_plus_one;
pub mod unused_eager_loading;

pub use counter_cache::CounterCacheDetector;
pub use join_collector::{JoinCollector, JoinedEagerLoad};
pub use n_plus_one::NPlusOneDetector;
pub use unused_eager_loading::{PendingEagerLoad, UnusedEagerLoadingDetector};
