//! Unit of work bound to the current task or thread
//!
//! Adapters that cannot pass a [`UnitOfWork`] through the data layer call
//! the free functions here instead. Inside [`run_in_unit_of_work`] the unit
//! of work lives in a tokio task-local and follows the task across worker
//! threads. Everywhere else it lives in a thread-local slot managed with
//! [`begin_unit_of_work`] and [`end_unit_of_work`].
//!
//! Every notification is a no-op when no unit of work is active, and also
//! when it arrives while the slot is already in use on this thread, as
//! happens when a tracing subscriber reports back into the data layer.

use crate::config::DetectorConfig;
use crate::detectors::JoinCollector;
use crate::error::{DetectorError, DetectorResult};
use crate::ledger::AccessState;
use crate::notification::Finding;
use crate::record::RecordRef;
use crate::unit_of_work::UnitOfWork;
use std::cell::RefCell;
use std::future::Future;
use std::panic::Location;
use tracing::{error, trace, warn};

tokio::task_local! {
    static TASK_UNIT: RefCell<Option<UnitOfWork>>;
}

thread_local! {
    static THREAD_UNIT: RefCell<Option<UnitOfWork>> = const { RefCell::new(None) };
}

fn borrow_slot<R>(
    slot: &RefCell<Option<UnitOfWork>>,
    f: impl FnOnce(&mut Option<UnitOfWork>) -> R,
) -> Option<R> {
    match slot.try_borrow_mut() {
        Ok(mut unit) => Some(f(&mut unit)),
        Err(_) => {
            trace!("Re-entrant notification ignored");
            None
        }
    }
}

/// Run `f` on the current slot. Returns `None` if the slot is already borrowed.
fn with_slot<R>(f: impl FnOnce(&mut Option<UnitOfWork>) -> R) -> Option<R> {
    if TASK_UNIT.try_with(|_| ()).is_ok() {
        TASK_UNIT.with(|slot| borrow_slot(slot, f))
    } else {
        THREAD_UNIT.with(|slot| borrow_slot(slot, f))
    }
}

fn with_active<R>(f: impl FnOnce(&mut UnitOfWork) -> R) -> Option<R> {
    with_slot(|slot| match slot.as_mut() {
        Some(unit) => Some(f(unit)),
        None => {
            trace!("Notification outside of a unit of work ignored");
            None
        }
    })
    .flatten()
}

/// Start a unit of work with the default configuration
pub fn begin_unit_of_work() {
    begin_unit_of_work_with(DetectorConfig::default());
}

/// Start a unit of work. An unfinished previous one is discarded.
pub fn begin_unit_of_work_with(config: DetectorConfig) {
    with_slot(|slot| {
        if let Some(previous) = slot.replace(UnitOfWork::new(config)) {
            warn!(
                "Unit of work {} was never ended; discarding {} pending findings",
                previous.id(),
                previous.findings().len()
            );
        }
    });
}

/// End the active unit of work and return its findings
pub fn end_unit_of_work() -> DetectorResult<Vec<Finding>> {
    match with_slot(|slot| slot.take()).flatten() {
        Some(unit) => Ok(unit.finish()),
        None => {
            error!("end_unit_of_work called without a matching begin_unit_of_work");
            Err(DetectorError::NoActiveUnitOfWork)
        }
    }
}

pub fn is_active() -> bool {
    with_slot(|slot| slot.is_some()).unwrap_or(false)
}

/// Run `future` with a fresh unit of work bound to its task.
/// Returns the future's output together with the unit's findings.
pub async fn run_in_unit_of_work<F>(config: DetectorConfig, future: F) -> (F::Output, Vec<Finding>)
where
    F: Future,
{
    TASK_UNIT
        .scope(RefCell::new(Some(UnitOfWork::new(config))), async move {
            let output = future.await;
            let findings = TASK_UNIT
                .with(|slot| slot.borrow_mut().take())
                .map(UnitOfWork::finish)
                .unwrap_or_default();
            (output, findings)
        })
        .await
}

pub fn on_batch_loaded(records: &[RecordRef]) {
    with_active(|unit| unit.on_batch_loaded(records));
}

pub fn on_eager_load<S: AsRef<str>>(records: &[RecordRef], association_names: &[S]) {
    with_active(|unit| unit.on_eager_load(records, association_names));
}

#[track_caller]
pub fn on_association_read(record: &RecordRef, association_name: &str) {
    let location = Location::caller();
    with_active(|unit| unit.association_read(record, association_name, location));
}

pub fn on_inverse_association_read(record: &RecordRef, association_name: &str) {
    with_active(|unit| unit.on_inverse_association_read(record, association_name));
}

pub fn on_association_loaded(owner: &RecordRef, association_name: &str, targets: &[RecordRef]) {
    with_active(|unit| unit.on_association_loaded(owner, association_name, targets));
}

#[track_caller]
pub fn on_collection_size_check(record: &RecordRef, association_name: &str, has_cache: bool) {
    let location = Location::caller();
    with_active(|unit| unit.collection_size_check(record, association_name, has_cache, location));
}

pub fn begin_join_materialization() -> JoinCollector {
    JoinCollector::new()
}

pub fn finish_join_materialization(collector: JoinCollector) {
    with_active(|unit| unit.finish_join_materialization(collector));
}

/// Whether `record` is at risk in the active unit of work
pub fn is_at_risk(record: &RecordRef) -> bool {
    with_active(|unit| unit.is_at_risk(record)).unwrap_or(false)
}

/// Access state of an association in the active unit of work
pub fn state_of(record: &RecordRef, association_name: &str) -> AccessState {
    with_active(|unit| unit.state_of(record, association_name)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::FindingKind;

    fn posts(ids: &[i64]) -> Vec<RecordRef> {
        ids.iter().map(|id| RecordRef::new("Post", *id)).collect()
    }

    #[test]
    fn test_thread_scope_round_trip() {
        begin_unit_of_work();
        assert!(is_active());

        let batch = posts(&[1, 2]);
        on_batch_loaded(&batch);
        assert!(is_at_risk(&batch[0]));
        on_association_read(&batch[0], "author");
        on_association_read(&batch[1], "author");

        let findings = end_unit_of_work().unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::NPlusOne);
        assert!(findings[0].call_site.as_ref().unwrap().file.ends_with("scope.rs"));
        assert!(!is_active());
    }

    #[test]
    fn test_end_without_begin_is_an_error() {
        assert_eq!(end_unit_of_work(), Err(DetectorError::NoActiveUnitOfWork));
    }

    #[test]
    fn test_notifications_without_unit_are_ignored() {
        let batch = posts(&[1, 2]);
        on_batch_loaded(&batch);
        on_association_read(&batch[0], "author");
        assert!(!is_at_risk(&batch[0]));
        assert_eq!(state_of(&batch[0], "author"), AccessState::Unknown);
    }

    #[test]
    fn test_begin_discards_unfinished_unit() {
        begin_unit_of_work();
        on_collection_size_check(&RecordRef::new("Post", 1), "comments", false);
        begin_unit_of_work();
        assert!(end_unit_of_work().unwrap().is_empty());
    }

    #[test]
    fn test_notifications_while_slot_is_borrowed_are_ignored() {
        begin_unit_of_work();
        let batch = posts(&[1, 2]);

        THREAD_UNIT.with(|slot| {
            let _held = slot.borrow();
            on_batch_loaded(&batch);
            on_association_read(&batch[0], "author");
            assert!(!is_at_risk(&batch[0]));
        });

        assert!(is_active());
        assert!(!is_at_risk(&batch[0]));
        on_batch_loaded(&batch);
        assert!(is_at_risk(&batch[0]));
        assert!(end_unit_of_work().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_task_scope_collects_findings() {
        let ((), findings) = run_in_unit_of_work(DetectorConfig::default(), async {
            let batch = posts(&[1, 2]);
            on_batch_loaded(&batch);
            on_eager_load(&batch, &["comments"]);
            tokio::task::yield_now().await;
        })
        .await;

        assert_eq!(findings, vec![Finding::unused_eager_load("Post", "comments")]);
        assert!(!is_active());
    }
}
