//! Safety-net registry: exactly-once cleanup across the explicit and
//! reclamation paths.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use reclaim_resource::testing::{ReleaseLog, TestError};
use reclaim_resource::{
    EventBus, LifecycleEvent, SafetyNetConfig, SafetyNetRegistry, SafetyNetStats, Trigger,
};
use rstest::rstest;

fn manual() -> SafetyNetRegistry {
    SafetyNetRegistry::new(&SafetyNetConfig::manual())
}

/// Owner holding a native buffer id; the cleanup only copies the id.
struct NativeBuffer {
    id: u32,
}

#[test]
fn explicit_clean_then_reclaim_logs_once() {
    reclaim_log::init_test();
    let registry = manual();
    let log = ReleaseLog::new();

    let owner = Arc::new(NativeBuffer { id: 7 });
    let (id, sink) = (owner.id, log.clone());
    let cleanable = registry.register(&owner, "buffer", move || sink.push(format!("log({id})")));

    assert!(cleanable.clean());
    drop(owner);
    registry.reclaim();
    registry.reclaim();

    assert_eq!(log.order(), vec!["log(7)"]);
}

#[test]
fn reclaim_then_explicit_clean_runs_once() {
    let registry = manual();
    let count = Arc::new(AtomicUsize::new(0));
    let owner = Arc::new(NativeBuffer { id: 1 });
    let count_c = Arc::clone(&count);
    let cleanable = registry.register(&owner, "buffer", move || {
        count_c.fetch_add(1, Ordering::SeqCst);
    });

    drop(owner);
    assert_eq!(registry.reclaim().fired, 1);
    assert!(!cleanable.clean());
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn racing_triggers_run_cleanup_once() {
    for _ in 0..64 {
        let registry = Arc::new(manual());
        let count = Arc::new(AtomicUsize::new(0));
        let owner = Arc::new(NativeBuffer { id: 3 });
        let count_c = Arc::clone(&count);
        let cleanable = Arc::new(registry.register(&owner, "raced", move || {
            count_c.fetch_add(1, Ordering::SeqCst);
        }));
        drop(owner);

        let barrier = Arc::new(Barrier::new(2));
        let explicit = {
            let barrier = Arc::clone(&barrier);
            let cleanable = Arc::clone(&cleanable);
            thread::spawn(move || {
                barrier.wait();
                cleanable.clean();
            })
        };
        let implicit = {
            let barrier = Arc::clone(&barrier);
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                barrier.wait();
                registry.reclaim();
            })
        };
        explicit.join().unwrap();
        implicit.join().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let stats = registry.stats();
        assert_eq!(stats.explicit + stats.implicit, 1);
    }
}

#[test]
fn cleanup_capturing_its_owner_never_fires() {
    let registry = manual();
    let owner = Arc::new(NativeBuffer { id: 9 });
    let captured = Arc::clone(&owner);
    let _cleanable = registry.register(&owner, "self-referential", move || drop(captured));

    drop(owner);
    assert_eq!(registry.reclaim().fired, 0);
    let pending: Vec<String> = registry.pending().into_iter().map(|(_, l)| l).collect();
    assert_eq!(pending, vec!["self-referential"]);
}

#[test]
fn reaper_thread_reclaims_without_explicit_pass() {
    let config = SafetyNetConfig {
        reap_interval: Some(Duration::from_millis(5)),
        ..SafetyNetConfig::default()
    };
    let registry = SafetyNetRegistry::new(&config);
    assert!(registry.has_reaper());

    let count = Arc::new(AtomicUsize::new(0));
    let owner = Arc::new(NativeBuffer { id: 4 });
    let count_c = Arc::clone(&count);
    let _cleanable = registry.register(&owner, "reaped", move || {
        count_c.fetch_add(1, Ordering::SeqCst);
    });
    drop(owner);

    let deadline = Instant::now() + Duration::from_secs(5);
    while count.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(count.load(Ordering::SeqCst), 1);

    registry.shutdown();
    assert!(!registry.has_reaper());
}

#[test]
fn faults_are_reported_on_the_event_bus() {
    let bus = Arc::new(EventBus::new(16));
    let mut rx = bus.subscribe();
    let registry = SafetyNetRegistry::with_events(&SafetyNetConfig::manual(), Arc::clone(&bus));

    let owner = Arc::new(NativeBuffer { id: 5 });
    let _cleanable = registry.register_fallible(&owner, "socket", || {
        Err::<(), _>(TestError::new("already closed"))
    });
    drop(owner);

    let report = registry.reclaim();
    assert_eq!(report.faults, 1);

    let entry = match rx.try_recv().unwrap() {
        LifecycleEvent::SafetyNetFired {
            entry,
            label,
            trigger,
        } => {
            assert_eq!(label, "socket");
            assert_eq!(trigger, Trigger::Reclaimed);
            entry
        }
        other => panic!("unexpected event: {other:?}"),
    };
    assert_eq!(
        rx.try_recv().unwrap(),
        LifecycleEvent::SafetyNetFault {
            entry,
            label: "socket".to_string(),
            error: "already closed".to_string(),
        }
    );
}

#[test]
fn many_owners_are_each_cleaned_once() {
    let registry = manual();
    let count = Arc::new(AtomicUsize::new(0));
    let mut owners = Vec::new();
    let mut cleanables = Vec::new();
    for id in 0..100 {
        let owner = Arc::new(NativeBuffer { id });
        let count_c = Arc::clone(&count);
        cleanables.push(registry.register(&owner, format!("buf-{id}"), move || {
            count_c.fetch_add(1, Ordering::SeqCst);
        }));
        owners.push(owner);
    }

    // Close the even ones explicitly, leak the odd ones.
    for (i, cleanable) in cleanables.iter().enumerate() {
        if i % 2 == 0 {
            cleanable.clean();
        }
    }
    owners.clear();
    assert_eq!(registry.reclaim().fired, 50);
    assert_eq!(count.load(Ordering::SeqCst), 100);

    let stats = registry.stats();
    assert_eq!(stats.explicit, 50);
    assert_eq!(stats.implicit, 50);
    assert_eq!(stats.pending, 0);
}

#[rstest]
#[case::error(false, "bad")]
#[case::panic(true, "panicked: bad")]
fn explicit_clean_reports_faults_out_of_band(#[case] panics: bool, #[case] message: &str) {
    let bus = Arc::new(EventBus::new(16));
    let mut rx = bus.subscribe();
    let registry = SafetyNetRegistry::with_events(&SafetyNetConfig::manual(), Arc::clone(&bus));

    let owner = Arc::new(NativeBuffer { id: 11 });
    let cleanable = registry.register_fallible(&owner, "pipe", move || {
        if panics {
            panic!("bad");
        }
        Err::<(), _>(TestError::new("bad"))
    });

    assert!(cleanable.clean());
    assert!(!cleanable.clean());
    assert_eq!(
        registry.stats(),
        SafetyNetStats {
            registered: 1,
            explicit: 1,
            implicit: 0,
            drained: 0,
            faults: 1,
            pending: 0,
        }
    );

    let entry = cleanable.id();
    assert_eq!(
        rx.try_recv().unwrap(),
        LifecycleEvent::SafetyNetFired {
            entry,
            label: "pipe".to_string(),
            trigger: Trigger::Explicit,
        }
    );
    assert_eq!(
        rx.try_recv().unwrap(),
        LifecycleEvent::SafetyNetFault {
            entry,
            label: "pipe".to_string(),
            error: message.to_string(),
        }
    );
    drop(owner);
}

#[test]
fn registry_dropped_inside_reaper_cleanup_shuts_down_cleanly() {
    let bus = Arc::new(EventBus::new(16));
    let mut rx = bus.subscribe();
    let config = SafetyNetConfig {
        reap_interval: Some(Duration::from_millis(5)),
        run_pending_on_shutdown: true,
    };
    let registry = Arc::new(SafetyNetRegistry::with_events(&config, Arc::clone(&bus)));
    let drained = Arc::new(AtomicUsize::new(0));

    // Stays alive; only the shutdown drain can run its cleanup.
    let bystander = Arc::new(NativeBuffer { id: 2 });
    let drained_c = Arc::clone(&drained);
    let _kept = registry.register(&bystander, "bystander", move || {
        drained_c.fetch_add(1, Ordering::SeqCst);
    });

    // The cleanup holds the last registry handle and drops it on the reaper.
    let owner = Arc::new(NativeBuffer { id: 1 });
    let last_handle = Arc::clone(&registry);
    let _cleanable = registry.register(&owner, "last-handle", move || drop(last_handle));
    drop(registry);
    drop(owner);

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut events = Vec::new();
    while drained.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert_eq!(drained.load(Ordering::SeqCst), 1);
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, LifecycleEvent::SafetyNetFault { .. })),
        "unexpected fault: {events:?}"
    );
    drop(bystander);
}
