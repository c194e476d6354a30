//! Property tests for teardown ordering and failure priority

use proptest::prelude::*;
use reclaim_resource::testing::{ReleaseLog, TestError};
use reclaim_resource::{Error, ReleaseAction, Scope, Stage};

/// Per-handle plan: does its release fail?
fn arb_release_plan() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), 1..12)
}

fn acquire_all(scope: &mut Scope, log: &ReleaseLog, plan: &[bool]) {
    for (i, fails) in plan.iter().enumerate() {
        let name = format!("h{i}");
        let action: ReleaseAction<()> = if *fails {
            log.failing_action(&name, &format!("R{i}"))
        } else {
            log.action(&name)
        };
        scope.acquire(name, (), action).unwrap();
    }
}

proptest! {
    /// Releases happen in exactly the reverse of acquisition order.
    #[test]
    fn releases_are_reverse_of_acquisition(plan in arb_release_plan()) {
        let log = ReleaseLog::new();
        let mut scope = Scope::new();
        acquire_all(&mut scope, &log, &plan);
        let _ = scope.close();

        let expected: Vec<String> = (0..plan.len()).rev().map(|i| format!("h{i}")).collect();
        prop_assert_eq!(log.order(), expected);
    }

    /// A use failure outranks every release failure.
    #[test]
    fn use_failure_is_always_primary(plan in arb_release_plan()) {
        let log = ReleaseLog::new();
        let mut scope = Scope::new();
        let handle = scope.acquire("user", (), ReleaseAction::noop()).unwrap();
        acquire_all(&mut scope, &log, &plan);

        let used = scope.with(&handle, |()| Err::<(), _>(TestError::new("U")));
        prop_assert!(matches!(used, Err(Error::Use(_))));

        let err = scope.close().unwrap_err();
        let teardown = err.as_teardown().unwrap();
        prop_assert_eq!(teardown.primary().stage(), Stage::Use);
        prop_assert_eq!(teardown.primary().cause().to_string(), "U");

        let failing = plan.iter().filter(|f| **f).count();
        prop_assert_eq!(teardown.suppressed().len(), failing);
        prop_assert!(teardown.suppressed().iter().all(|f| f.stage() == Stage::Release));
    }

    /// Without a use failure, release failures rank in release order.
    #[test]
    fn first_release_failure_is_primary(plan in arb_release_plan()) {
        let log = ReleaseLog::new();
        let mut scope = Scope::new();
        acquire_all(&mut scope, &log, &plan);

        let expected: Vec<String> = plan
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, fails)| **fails)
            .map(|(i, _)| format!("R{i}"))
            .collect();

        match scope.close() {
            Ok(()) => prop_assert!(expected.is_empty()),
            Err(err) => {
                let teardown = err.as_teardown().unwrap();
                let causes: Vec<String> =
                    teardown.causes().map(|f| f.cause().to_string()).collect();
                prop_assert_eq!(causes, expected);
            }
        }
    }
}
