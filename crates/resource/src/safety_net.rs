//! Reachability-triggered fallback cleanup.
//!
//! A [`SafetyNetRegistry`] pairs a *weakly held* owner with a cleanup action.
//! The action runs at most once: either when the holder of the returned
//! [`Cleanable`] calls [`Cleanable::clean`], or when a reclamation pass finds
//! that every strong reference to the owner is gone.
//!
//! This is a safety net, never the primary release path. There is no bound
//! on how long after the owner dies the cleanup runs: passes happen only
//! when [`SafetyNetRegistry::reclaim`] is called or the background reaper
//! wakes up, and a cleanup that captures its own owner keeps it alive
//! forever, so it never fires at all. Release deterministically through a
//! [`Scope`](crate::Scope) and let the net catch what slips through.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::SafetyNetConfig;
use crate::error::{BoxError, panic_cause};
use crate::events::{EventBus, LifecycleEvent};

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl EntryId {
    fn next() -> Self {
        Self(NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Build an id from a raw value. Only meaningful for display and tests.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry-{}", self.0)
    }
}

type CleanupFn = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

/// What ran a cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// [`Cleanable::clean`].
    Explicit,
    /// A reclamation pass found the owner gone.
    Reclaimed,
    /// Shutdown drained a still-armed entry; the owner may be alive.
    Shutdown,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => f.write_str("explicit"),
            Self::Reclaimed => f.write_str("reclaimed"),
            Self::Shutdown => f.write_str("shutdown"),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

struct Entry {
    id: EntryId,
    label: Arc<str>,
    /// Probe over a `Weak` to the owner; never upgrades.
    owner_alive: Box<dyn Fn() -> bool + Send + Sync>,
    armed: AtomicBool,
    action: Mutex<Option<CleanupFn>>,
}

/// What happened when an entry was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fired {
    /// Another trigger already ran (or is running) the action.
    Disarmed,
    Ran,
    Faulted,
}

// ---------------------------------------------------------------------------
// Inner
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Counters {
    registered: AtomicU64,
    explicit: AtomicU64,
    implicit: AtomicU64,
    drained: AtomicU64,
    faults: AtomicU64,
}

impl Counters {
    fn for_trigger(&self, trigger: Trigger) -> &AtomicU64 {
        match trigger {
            Trigger::Explicit => &self.explicit,
            Trigger::Reclaimed => &self.implicit,
            Trigger::Shutdown => &self.drained,
        }
    }
}

struct Inner {
    entries: DashMap<EntryId, Arc<Entry>>,
    counters: Counters,
    events: Option<Arc<EventBus>>,
}

impl Inner {
    fn reclaim(&self) -> ReclaimReport {
        let scanned = self.entries.len();
        // Collect first: triggering while iterating would hold shard locks.
        let dead: Vec<Arc<Entry>> = self
            .entries
            .iter()
            .filter(|entry| !(entry.owner_alive)())
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut report = ReclaimReport {
            scanned,
            ..ReclaimReport::default()
        };
        for entry in dead {
            self.entries.remove(&entry.id);
            match fire(&entry, Trigger::Reclaimed, Some(self)) {
                Fired::Ran => report.fired += 1,
                Fired::Faulted => {
                    report.fired += 1;
                    report.faults += 1;
                }
                Fired::Disarmed => {}
            }
        }
        if report.fired > 0 {
            tracing::debug!(
                scanned = report.scanned,
                fired = report.fired,
                faults = report.faults,
                "Reclamation pass"
            );
        }
        report
    }

    fn drain(&self) -> usize {
        let pending: Vec<Arc<Entry>> = self
            .entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut fired = 0;
        for entry in pending {
            self.entries.remove(&entry.id);
            if fire(&entry, Trigger::Shutdown, Some(self)) != Fired::Disarmed {
                fired += 1;
            }
        }
        fired
    }

    fn emit(&self, event: impl FnOnce() -> LifecycleEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event());
        }
    }
}

/// Run the entry's action if this caller wins the one-shot transition.
///
/// Faults are reported out of band: logged, counted and emitted. They never
/// unwind into the caller, which may be the reaper thread.
fn fire(entry: &Entry, trigger: Trigger, inner: Option<&Inner>) -> Fired {
    if entry
        .armed
        .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Fired::Disarmed;
    }
    let Some(action) = entry.action.lock().take() else {
        return Fired::Disarmed;
    };

    if trigger == Trigger::Reclaimed {
        tracing::warn!(
            entry = %entry.id,
            label = %entry.label,
            "Owner dropped without explicit cleanup, safety net releasing"
        );
    }
    let outcome =
        catch_unwind(AssertUnwindSafe(action)).unwrap_or_else(|payload| Err(panic_cause(payload)));

    if let Some(inner) = inner {
        inner
            .counters
            .for_trigger(trigger)
            .fetch_add(1, Ordering::Relaxed);
        inner.emit(|| LifecycleEvent::SafetyNetFired {
            entry: entry.id,
            label: entry.label.to_string(),
            trigger,
        });
    }

    match outcome {
        Ok(()) => Fired::Ran,
        Err(error) => {
            tracing::error!(
                entry = %entry.id,
                label = %entry.label,
                trigger = %trigger,
                error = %error,
                "Safety-net cleanup failed"
            );
            if let Some(inner) = inner {
                inner.counters.faults.fetch_add(1, Ordering::Relaxed);
                inner.emit(|| LifecycleEvent::SafetyNetFault {
                    entry: entry.id,
                    label: entry.label.to_string(),
                    error: error.to_string(),
                });
            }
            Fired::Faulted
        }
    }
}

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Outcome of one reclamation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Entries inspected.
    pub scanned: usize,
    /// Cleanups run because their owner was gone.
    pub fired: usize,
    /// Of those, how many failed or panicked.
    pub faults: usize,
}

/// Point-in-time counters of a registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SafetyNetStats {
    /// Entries ever registered.
    pub registered: u64,
    /// Cleanups run through [`Cleanable::clean`].
    pub explicit: u64,
    /// Cleanups run by reclamation.
    pub implicit: u64,
    /// Cleanups run by the shutdown drain.
    pub drained: u64,
    /// Cleanups that failed or panicked.
    pub faults: u64,
    /// Entries still armed.
    pub pending: usize,
}

/// Explicit trigger for one registered cleanup.
///
/// Holding a `Cleanable` does not keep the owner alive. Dropping it does not
/// run or disarm anything; the entry stays armed for the reclamation path.
pub struct Cleanable {
    entry: Arc<Entry>,
    inner: Weak<Inner>,
}

impl Cleanable {
    /// Run the cleanup now if it has not run yet, and disarm the entry.
    ///
    /// Returns `true` if this call ran the action. A failing action is
    /// reported like a reclamation fault (log, counter, event) and still
    /// counts as run.
    pub fn clean(&self) -> bool {
        let inner = self.inner.upgrade();
        if let Some(inner) = &inner {
            inner.entries.remove(&self.entry.id);
        }
        fire(&self.entry, Trigger::Explicit, inner.as_deref()) != Fired::Disarmed
    }

    /// Whether the cleanup is still waiting to run.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.entry.armed.load(Ordering::Acquire)
    }

    /// Identity of the entry.
    #[must_use]
    pub fn id(&self) -> EntryId {
        self.entry.id
    }
}

impl fmt::Debug for Cleanable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cleanable")
            .field("id", &self.entry.id)
            .field("label", &self.entry.label)
            .field("armed", &self.is_armed())
            .finish()
    }
}

struct Reaper {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// SafetyNetRegistry
// ---------------------------------------------------------------------------

/// Registry of fallback cleanups keyed on owner reachability.
///
/// The registry holds owners only through `Weak`, so registering never
/// extends an owner's life. Entries are triggered by [`Cleanable::clean`],
/// by [`reclaim`](Self::reclaim), or by the background reaper thread when
/// `reap_interval` is configured.
pub struct SafetyNetRegistry {
    inner: Arc<Inner>,
    reaper: Mutex<Option<Reaper>>,
    run_pending_on_shutdown: bool,
}

impl SafetyNetRegistry {
    /// Create a registry that emits no events.
    #[must_use]
    pub fn new(config: &SafetyNetConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a registry that reports firings and faults on `bus`.
    #[must_use]
    pub fn with_events(config: &SafetyNetConfig, bus: Arc<EventBus>) -> Self {
        Self::build(config, Some(bus))
    }

    fn build(config: &SafetyNetConfig, events: Option<Arc<EventBus>>) -> Self {
        let inner = Arc::new(Inner {
            entries: DashMap::new(),
            counters: Counters::default(),
            events,
        });
        let reaper = config
            .reap_interval
            .and_then(|interval| spawn_reaper(Arc::clone(&inner), interval));
        Self {
            inner,
            reaper: Mutex::new(reaper),
            run_pending_on_shutdown: config.run_pending_on_shutdown,
        }
    }

    /// Register `cleanup` to run once `owner` becomes unreachable.
    ///
    /// `cleanup` must not capture `owner` (or anything holding a strong
    /// reference to it): that keeps the owner reachable and the entry never
    /// fires. Copy the data the cleanup needs out of the owner instead.
    pub fn register<T, F>(&self, owner: &Arc<T>, label: impl Into<Arc<str>>, cleanup: F) -> Cleanable
    where
        T: ?Sized + Send + Sync + 'static,
        F: FnOnce() + Send + 'static,
    {
        self.register_fallible(owner, label, move || {
            cleanup();
            Ok::<(), BoxError>(())
        })
    }

    /// Like [`register`](Self::register), for cleanups that can fail.
    pub fn register_fallible<T, F, E>(
        &self,
        owner: &Arc<T>,
        label: impl Into<Arc<str>>,
        cleanup: F,
    ) -> Cleanable
    where
        T: ?Sized + Send + Sync + 'static,
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        let weak = Arc::downgrade(owner);
        let entry = Arc::new(Entry {
            id: EntryId::next(),
            label: label.into(),
            owner_alive: Box::new(move || weak.strong_count() > 0),
            armed: AtomicBool::new(true),
            action: Mutex::new(Some(Box::new(move || cleanup().map_err(Into::into)))),
        });
        self.inner.entries.insert(entry.id, Arc::clone(&entry));
        self.inner.counters.registered.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(entry = %entry.id, label = %entry.label, "Registered safety net");

        Cleanable {
            entry,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Run one reclamation pass now.
    pub fn reclaim(&self) -> ReclaimReport {
        self.inner.reclaim()
    }

    /// Number of entries still armed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Whether no entry is armed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Labels of entries still armed.
    #[must_use]
    pub fn pending(&self) -> Vec<(EntryId, String)> {
        let mut pending: Vec<_> = self
            .inner
            .entries
            .iter()
            .map(|entry| (entry.id, entry.label.to_string()))
            .collect();
        pending.sort_by_key(|(id, _)| *id);
        pending
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> SafetyNetStats {
        let c = &self.inner.counters;
        SafetyNetStats {
            registered: c.registered.load(Ordering::Relaxed),
            explicit: c.explicit.load(Ordering::Relaxed),
            implicit: c.implicit.load(Ordering::Relaxed),
            drained: c.drained.load(Ordering::Relaxed),
            faults: c.faults.load(Ordering::Relaxed),
            pending: self.inner.entries.len(),
        }
    }

    /// Whether a background reaper thread is running.
    #[must_use]
    pub fn has_reaper(&self) -> bool {
        self.reaper.lock().is_some()
    }

    /// Stop the reaper and, if configured, run every still-armed cleanup.
    ///
    /// Idempotent. Also called on drop.
    pub fn shutdown(&self) {
        if let Some(reaper) = self.reaper.lock().take() {
            drop(reaper.stop);
            // Dropped from inside a cleanup on the reaper itself: the loop
            // sees the closed channel and exits after this pass.
            if reaper.thread.thread().id() == std::thread::current().id() {
                tracing::debug!("Safety-net registry dropped on its reaper thread");
            } else if reaper.thread.join().is_err() {
                tracing::error!("Safety-net reaper thread panicked");
            }
        }
        if self.run_pending_on_shutdown {
            let fired = self.inner.drain();
            if fired > 0 {
                tracing::warn!(fired, "Ran pending safety-net cleanups at shutdown");
            }
        } else if !self.inner.entries.is_empty() {
            tracing::debug!(
                pending = self.inner.entries.len(),
                "Safety-net registry shut down with armed entries"
            );
        }
    }
}

fn spawn_reaper(inner: Arc<Inner>, interval: Duration) -> Option<Reaper> {
    let (stop, stopped) = channel::bounded::<()>(0);
    let spawned = std::thread::Builder::new()
        .name("reclaim-reaper".to_string())
        .spawn(move || {
            loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        inner.reclaim();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::trace!("Safety-net reaper stopped");
        });

    match spawned {
        Ok(thread) => Some(Reaper { stop, thread }),
        Err(error) => {
            tracing::error!(error = %error, "Failed to spawn safety-net reaper, passes run on demand only");
            None
        }
    }
}

impl Default for SafetyNetRegistry {
    fn default() -> Self {
        Self::new(&SafetyNetConfig::default())
    }
}

impl Drop for SafetyNetRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for SafetyNetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafetyNetRegistry")
            .field("stats", &self.stats())
            .field("reaper", &self.has_reaper())
            .finish()
    }
}
