//! Scope teardown: reverse release order, failure aggregation and
//! guaranteed release on every exit path.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;
use reclaim_resource::testing::{ReleaseLog, TestError};
use reclaim_resource::{BoxError, Error, Releasable, ReleaseAction, ScopeManager, Stage};

fn messages(err: &Error) -> (String, Vec<String>) {
    let teardown = err.as_teardown().expect("teardown failure");
    (
        teardown.primary().cause().to_string(),
        teardown
            .suppressed()
            .iter()
            .map(|f| f.cause().to_string())
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[test]
fn noop_releases_run_in_reverse_acquisition_order() {
    reclaim_log::init_test();
    let manager = ScopeManager::new();
    let log = ReleaseLog::new();

    manager
        .scoped(|scope| {
            for name in ["A", "B", "C"] {
                scope.acquire(name, (), log.action(name))?;
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(log.order(), vec!["C", "B", "A"]);
}

#[test]
fn early_release_leaves_remaining_order_intact() {
    let manager = ScopeManager::new();
    let log = ReleaseLog::new();

    manager
        .scoped(|scope| {
            let _a = scope.acquire("A", (), log.action("A"))?;
            let b = scope.acquire("B", (), log.action("B"))?;
            let _c = scope.acquire("C", (), log.action("C"))?;
            scope.release(&b)?;
            Ok(())
        })
        .unwrap();

    assert_eq!(log.order(), vec!["B", "C", "A"]);
}

// ---------------------------------------------------------------------------
// Failure aggregation
// ---------------------------------------------------------------------------

#[test]
fn use_failure_is_primary_and_release_failures_are_suppressed() {
    let manager = ScopeManager::new();
    let log = ReleaseLog::new();

    let err = manager
        .scoped(|scope| {
            let a = scope.acquire("A", (), log.failing_action("A", "close error"))?;
            let _b = scope.acquire("B", (), log.failing_action("B", "close error"))?;
            scope.with(&a, |()| Err::<(), _>(TestError::new("disk error")))
        })
        .unwrap_err();

    assert_eq!(log.order(), vec!["B", "A"]);
    let (primary, suppressed) = messages(&err);
    assert_eq!(primary, "disk error");
    assert_eq!(suppressed, vec!["close error", "close error"]);

    let teardown = err.as_teardown().unwrap();
    assert_eq!(teardown.primary().stage(), Stage::Use);
    let labels: Vec<&str> = teardown.suppressed().iter().map(|f| f.label()).collect();
    assert_eq!(labels, vec!["B", "A"]);
}

#[test]
fn first_release_failure_is_primary_without_use_failure() {
    let manager = ScopeManager::new();
    let log = ReleaseLog::new();

    let err = manager
        .scoped(|scope| {
            scope.acquire("A", (), log.failing_action("A", "R2"))?;
            scope.acquire("B", (), log.action("B"))?;
            scope.acquire("C", (), log.failing_action("C", "R1"))?;
            Ok(())
        })
        .unwrap_err();

    assert_eq!(messages(&err), ("R1".to_string(), vec!["R2".to_string()]));
    assert_eq!(log.order(), vec!["C", "B", "A"]);
}

#[test]
fn handled_use_failure_still_surfaces_at_teardown() {
    let manager = ScopeManager::new();

    let err = manager
        .scoped(|scope| {
            let h = scope.acquire("conn", 0u8, ReleaseAction::noop())?;
            let attempt = scope.with(&h, |_| Err::<(), _>(TestError::new("timeout")));
            assert!(matches!(attempt, Err(Error::Use(_))));
            Ok("recovered")
        })
        .unwrap_err();

    assert_eq!(messages(&err).0, "timeout");
}

#[test]
fn misuse_errors_are_not_resource_failures() {
    let manager = ScopeManager::new();
    let mut first = manager.open_scope();
    let mut second = manager.open_scope();
    let h = first.acquire("A", 1u32, ReleaseAction::noop()).unwrap();

    let err = second.with(&h, |n| Ok::<_, TestError>(*n)).unwrap_err();
    assert!(err.is_misuse());
    assert!(second.close().is_ok());

    first.close().unwrap();
    let err = first.acquire("late", (), ReleaseAction::noop()).unwrap_err();
    assert!(err.is_misuse());
}

// ---------------------------------------------------------------------------
// Guaranteed release
// ---------------------------------------------------------------------------

#[test]
fn panicking_body_still_releases_everything() {
    let manager = ScopeManager::new();
    let log = ReleaseLog::new();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        manager.scoped(|scope| -> reclaim_resource::Result<()> {
            scope.acquire("A", (), log.action("A"))?;
            scope.acquire("B", (), log.action("B"))?;
            panic!("body exploded");
        })
    }));

    assert!(outcome.is_err());
    assert_eq!(log.order(), vec!["B", "A"]);
    assert_eq!(manager.stats().active_scopes(), 0);
}

#[test]
fn panicking_release_does_not_stop_teardown() {
    let manager = ScopeManager::new();
    let log = ReleaseLog::new();

    let err = manager
        .scoped(|scope| {
            scope.acquire("A", (), log.action("A"))?;
            scope.acquire("B", (), ReleaseAction::infallible(|()| panic!("native crash")))?;
            scope.acquire("C", (), log.action("C"))?;
            Ok(())
        })
        .unwrap_err();

    assert_eq!(log.order(), vec!["C", "A"]);
    assert_eq!(messages(&err).0, "panicked: native crash");
}

// ---------------------------------------------------------------------------
// Idempotent release
// ---------------------------------------------------------------------------

struct Room {
    open: bool,
    cleaned: Arc<AtomicUsize>,
}

impl Releasable for Room {
    fn release(&mut self) -> Result<(), BoxError> {
        if self.open {
            self.open = false;
            self.cleaned.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[test]
fn releasable_runs_once_through_scope() {
    let cleaned = Arc::new(AtomicUsize::new(0));
    let manager = ScopeManager::new();

    manager
        .scoped(|scope| {
            let room = scope.acquire_releasable(
                "room",
                Room {
                    open: true,
                    cleaned: Arc::clone(&cleaned),
                },
            )?;
            scope.release(&room)?;
            assert!(scope.release(&room).unwrap_err().is_misuse());
            Ok(())
        })
        .unwrap();

    assert_eq!(cleaned.load(Ordering::SeqCst), 1);
}

#[test]
fn release_action_twice_equals_once() {
    let count = Arc::new(AtomicUsize::new(0));
    let count_c = Arc::clone(&count);
    let mut action = ReleaseAction::infallible(move |()| {
        count_c.fetch_add(1, Ordering::SeqCst);
    });

    action.run(()).unwrap();
    action.run(()).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(action.is_spent());
}
