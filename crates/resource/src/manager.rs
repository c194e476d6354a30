//! Scope manager: opens scopes and runs bodies under guaranteed teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Failure, Result};
use crate::events::{EventBus, LifecycleEvent};
use crate::handle::HandleId;
use crate::scope::{Scope, ScopeId};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Counters {
    scopes_opened: AtomicU64,
    scopes_closed: AtomicU64,
    handles_acquired: AtomicU64,
    handles_released: AtomicU64,
    use_failures: AtomicU64,
    release_failures: AtomicU64,
}

/// State every scope opened by one manager reports into.
#[derive(Default)]
pub(crate) struct Shared {
    counters: Counters,
    events: Option<Arc<EventBus>>,
}

impl Shared {
    fn emit(&self, event: impl FnOnce() -> LifecycleEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event());
        }
    }

    pub(crate) fn scope_opened(&self, scope: ScopeId) {
        self.counters.scopes_opened.fetch_add(1, Ordering::Relaxed);
        self.emit(|| LifecycleEvent::ScopeOpened { scope });
    }

    pub(crate) fn handle_acquired(&self) {
        self.counters.handles_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn use_failed(&self) {
        self.counters.use_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn handle_released(&self, scope: ScopeId, handle: HandleId, label: &str) {
        self.counters.handles_released.fetch_add(1, Ordering::Relaxed);
        self.emit(|| LifecycleEvent::HandleReleased {
            scope,
            handle,
            label: label.to_string(),
        });
    }

    pub(crate) fn release_failed(
        &self,
        scope: ScopeId,
        handle: HandleId,
        label: &str,
        failure: &Failure,
    ) {
        // A failed release still relinquishes the handle.
        self.counters.handles_released.fetch_add(1, Ordering::Relaxed);
        self.counters.release_failures.fetch_add(1, Ordering::Relaxed);
        self.emit(|| LifecycleEvent::ReleaseFailed {
            scope,
            handle,
            label: label.to_string(),
            error: failure.cause().to_string(),
        });
    }

    pub(crate) fn scope_closed(&self, scope: ScopeId, released: usize, failed: usize) {
        self.counters.scopes_closed.fetch_add(1, Ordering::Relaxed);
        self.emit(|| LifecycleEvent::ScopeClosed {
            scope,
            released,
            failed,
        });
    }
}

// ---------------------------------------------------------------------------
// ScopeStats
// ---------------------------------------------------------------------------

/// Point-in-time counters for all scopes opened by a manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeStats {
    /// Scopes opened.
    pub scopes_opened: u64,
    /// Scopes torn down (explicitly or by drop).
    pub scopes_closed: u64,
    /// Handles acquired.
    pub handles_acquired: u64,
    /// Handles released, including failed releases.
    pub handles_released: u64,
    /// Operations that failed inside [`Scope::with`].
    pub use_failures: u64,
    /// Release actions that failed.
    pub release_failures: u64,
}

impl ScopeStats {
    /// Scopes opened but not yet torn down.
    #[must_use]
    pub fn active_scopes(&self) -> u64 {
        self.scopes_opened.saturating_sub(self.scopes_closed)
    }
}

// ---------------------------------------------------------------------------
// ScopeManager
// ---------------------------------------------------------------------------

/// Opens scopes and tracks their outcomes.
///
/// Cheap to clone; clones share counters and the event bus.
#[derive(Clone, Default)]
pub struct ScopeManager {
    shared: Arc<Shared>,
}

impl ScopeManager {
    /// Create a manager that emits no events.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager that emits lifecycle events on `bus`.
    #[must_use]
    pub fn with_events(bus: Arc<EventBus>) -> Self {
        Self {
            shared: Arc::new(Shared {
                counters: Counters::default(),
                events: Some(bus),
            }),
        }
    }

    /// Open an empty, active scope.
    #[must_use]
    pub fn open_scope(&self) -> Scope {
        Scope::with_shared(Arc::clone(&self.shared))
    }

    /// Run `body` inside a fresh scope and tear the scope down on every exit
    /// path.
    ///
    /// Outcome precedence follows the failure record: an error returned by
    /// `body` that the scope has not already recorded becomes the primary
    /// failure, and any release failures are suppressed behind it. If `body`
    /// panics, dropping the scope still releases every resource.
    pub fn scoped<R, F>(&self, body: F) -> Result<R>
    where
        F: FnOnce(&mut Scope) -> Result<R>,
    {
        let mut scope = self.open_scope();
        let outcome = body(&mut scope);
        if let Err(error) = &outcome {
            if !matches!(error, Error::Use(_)) {
                scope.record_body_failure(error);
            }
        }

        match (outcome, scope.close()) {
            (Ok(value), Ok(())) => Ok(value),
            (_, Err(teardown)) => Err(teardown),
            (Err(error), Ok(())) => Err(error),
        }
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> ScopeStats {
        let c = &self.shared.counters;
        ScopeStats {
            scopes_opened: c.scopes_opened.load(Ordering::Relaxed),
            scopes_closed: c.scopes_closed.load(Ordering::Relaxed),
            handles_acquired: c.handles_acquired.load(Ordering::Relaxed),
            handles_released: c.handles_released.load(Ordering::Relaxed),
            use_failures: c.use_failures.load(Ordering::Relaxed),
            release_failures: c.release_failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ScopeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeManager")
            .field("stats", &self.stats())
            .field("events", &self.shared.events.is_some())
            .finish()
    }
}
