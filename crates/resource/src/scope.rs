//! Scopes: ordered ownership of acquired resources with reverse-order teardown
//!
//! A [`Scope`] owns every resource acquired into it. When the scope ends,
//! either through [`Scope::close`] or by being dropped, the still-open
//! resources are released from most recently acquired to least recently
//! acquired. Failures raised while using or releasing resources are
//! aggregated into one [`TeardownFailure`]: the first failure is primary,
//! everything after it is suppressed, nothing is discarded.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{BoxError, Error, Failure, Result, Stage, TeardownFailure, panic_cause};
use crate::handle::{Handle, HandleId, HandleState};
use crate::manager::Shared;
use crate::release::{Releasable, ReleaseAction};

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    fn next() -> Self {
        Self(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Build an id from a raw value. Only meaningful for display and tests.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Type-erased slots
// ---------------------------------------------------------------------------

/// Type-erased slot so one scope can own resources of different types.
trait Slot: Send {
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn release(&mut self) -> std::result::Result<(), BoxError>;
}

struct Entry<T> {
    resource: Option<T>,
    action: ReleaseAction<T>,
}

impl<T: Send + 'static> Slot for Entry<T> {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn release(&mut self) -> std::result::Result<(), BoxError> {
        match self.resource.take() {
            Some(resource) => self.action.run(resource),
            None => Ok(()),
        }
    }
}

struct Held {
    id: HandleId,
    label: Arc<str>,
    state: HandleState,
    slot: Box<dyn Slot>,
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// A bounded unit of ownership over a sequence of acquired resources.
///
/// Intended for a single owner: `Scope` is `Send` but not `Sync`, and every
/// mutating operation takes `&mut self`.
///
/// Dropping an open scope closes it. A teardown failure observed on that path
/// has no caller to return to and is logged at `warn` level; call
/// [`close`](Self::close) or use [`ScopeManager::scoped`](crate::ScopeManager::scoped)
/// to receive it.
pub struct Scope {
    id: ScopeId,
    held: Vec<Held>,
    primary: Option<Failure>,
    suppressed: Vec<Failure>,
    closed: bool,
    shared: Option<Arc<Shared>>,
}

impl Scope {
    /// Create a standalone scope that reports to no manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ScopeId::next(),
            held: Vec::new(),
            primary: None,
            suppressed: Vec::new(),
            closed: false,
            shared: None,
        }
    }

    pub(crate) fn with_shared(shared: Arc<Shared>) -> Self {
        let mut scope = Self::new();
        shared.scope_opened(scope.id);
        scope.shared = Some(shared);
        scope
    }

    /// Identity of this scope.
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Whether the scope has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of handles still open.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.held
            .iter()
            .filter(|held| held.state == HandleState::Open)
            .count()
    }

    /// State of a handle, or `None` if it never belonged to this scope or the
    /// scope has been torn down.
    #[must_use]
    pub fn state<T>(&self, handle: &Handle<T>) -> Option<HandleState> {
        if handle.scope() != self.id {
            return None;
        }
        self.held
            .iter()
            .find(|held| held.id == handle.id())
            .map(|held| held.state)
    }

    /// The pending primary failure, if any has been recorded.
    #[must_use]
    pub fn primary_failure(&self) -> Option<&Failure> {
        self.primary.as_ref()
    }

    /// Take ownership of `resource`, to be released by `action` at teardown.
    ///
    /// # Errors
    /// [`Error::ScopeClosed`] if the scope has already been torn down. The
    /// resource is then released on the spot so it does not leak.
    pub fn acquire<T>(
        &mut self,
        label: impl Into<Arc<str>>,
        resource: T,
        mut action: ReleaseAction<T>,
    ) -> Result<Handle<T>>
    where
        T: Send + 'static,
    {
        let label = label.into();
        if self.closed {
            if let Err(error) = action.run(resource) {
                tracing::warn!(
                    scope = %self.id,
                    label = %label,
                    error = %error,
                    "Release of resource rejected by closed scope failed"
                );
            }
            return Err(Error::ScopeClosed { scope: self.id });
        }

        let id = HandleId::next();
        self.held.push(Held {
            id,
            label: Arc::clone(&label),
            state: HandleState::Open,
            slot: Box::new(Entry {
                resource: Some(resource),
                action,
            }),
        });
        if let Some(shared) = &self.shared {
            shared.handle_acquired();
        }
        tracing::debug!(scope = %self.id, handle = %id, label = %label, "Acquired resource");

        Ok(Handle::new(id, self.id))
    }

    /// Acquire a resource that releases itself through [`Releasable`].
    pub fn acquire_releasable<T: Releasable>(
        &mut self,
        label: impl Into<Arc<str>>,
        resource: T,
    ) -> Result<Handle<T>> {
        self.acquire(label, resource, ReleaseAction::releasable())
    }

    /// Run `operation` on the resource behind `handle`.
    ///
    /// A failure is recorded as the scope's primary failure (the first one
    /// wins; later ones are suppressed) and returned immediately as
    /// [`Error::Use`]. The scope does not unwind itself: the caller still
    /// reaches scope exit, which reports the failure again inside the
    /// teardown composite.
    pub fn with<T, R, E, F>(&mut self, handle: &Handle<T>, operation: F) -> Result<R>
    where
        T: Send + 'static,
        E: Into<BoxError>,
        F: FnOnce(&mut T) -> std::result::Result<R, E>,
    {
        let index = self.position(handle.id(), handle.scope())?;
        let stale = Error::StaleHandle {
            handle: handle.id(),
            scope: self.id,
        };
        let held = &mut self.held[index];
        let label = Arc::clone(&held.label);
        let resource = held
            .slot
            .as_any_mut()
            .downcast_mut::<Entry<T>>()
            .and_then(|entry| entry.resource.as_mut())
            .ok_or(stale)?;

        match operation(resource) {
            Ok(value) => Ok(value),
            Err(error) => {
                let failure = Failure::from_box(Stage::Use, Some(handle.id()), label, error.into());
                tracing::debug!(scope = %self.id, failure = %failure, "Resource operation failed");
                if let Some(shared) = &self.shared {
                    shared.use_failed();
                }
                self.record(failure.clone());
                Err(Error::Use(failure))
            }
        }
    }

    /// Release one handle now instead of at teardown.
    ///
    /// Its failure is returned directly and not recorded for teardown. The
    /// remaining handles keep their reverse release order.
    pub fn release<T>(&mut self, handle: &Handle<T>) -> Result<()> {
        let index = self.position(handle.id(), handle.scope())?;
        let shared = self.shared.clone();
        let held = &mut self.held[index];
        match release_held(self.id, held, shared.as_deref()) {
            Some(failure) => Err(Error::Release(failure)),
            None => Ok(()),
        }
    }

    /// Move the resource out of the scope without running its release action.
    ///
    /// The caller becomes responsible for releasing it.
    pub fn take<T: Send + 'static>(&mut self, handle: &Handle<T>) -> Result<T> {
        let index = self.position(handle.id(), handle.scope())?;
        let stale = Error::StaleHandle {
            handle: handle.id(),
            scope: self.id,
        };
        let held = &mut self.held[index];
        let resource = held
            .slot
            .as_any_mut()
            .downcast_mut::<Entry<T>>()
            .and_then(|entry| entry.resource.take())
            .ok_or(stale)?;
        held.state = HandleState::Released;
        Ok(resource)
    }

    /// Tear the scope down.
    ///
    /// Releases every open handle in reverse acquisition order, whatever the
    /// individual outcomes. If any failure was recorded during the scope's
    /// life, returns [`Error::Teardown`] with the primary failure and the
    /// suppressed ones in release order. A second call is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let shared = self.shared.clone();
        let mut released = 0;
        let mut failures = Vec::new();
        for held in self
            .held
            .iter_mut()
            .rev()
            .filter(|held| held.state == HandleState::Open)
        {
            released += 1;
            if let Some(failure) = release_held(self.id, held, shared.as_deref()) {
                failures.push(failure);
            }
        }
        self.held.clear();

        let failed = failures.len();
        for failure in failures {
            self.record(failure);
        }
        if let Some(shared) = &shared {
            shared.scope_closed(self.id, released, failed);
        }
        tracing::debug!(scope = %self.id, released, failed, "Scope closed");

        match self.primary.take() {
            Some(primary) => Err(Error::Teardown(TeardownFailure::new(
                self.id,
                primary,
                std::mem::take(&mut self.suppressed),
            ))),
            None => Ok(()),
        }
    }

    /// Record a failure from outside any resource operation.
    ///
    /// Used by guaranteed-exit wrappers so an error raised by the body
    /// outranks teardown failures.
    pub(crate) fn record_body_failure(&mut self, error: &Error) {
        if self.closed || self.primary.is_some() {
            return;
        }
        let failure = Failure::new(
            Stage::Body,
            None,
            Arc::from("scope"),
            Arc::new(error.clone()),
        );
        self.primary = Some(failure);
    }

    fn record(&mut self, failure: Failure) {
        if self.primary.is_none() {
            self.primary = Some(failure);
        } else {
            self.suppressed.push(failure);
        }
    }

    fn position(&self, handle: HandleId, scope: ScopeId) -> Result<usize> {
        let stale = || Error::StaleHandle {
            handle,
            scope: self.id,
        };
        if scope != self.id {
            return Err(stale());
        }
        self.held
            .iter()
            .position(|held| held.id == handle && held.state == HandleState::Open)
            .ok_or_else(stale)
    }
}

/// Release one held resource, converting an error or a panic into a failure.
fn release_held(scope: ScopeId, held: &mut Held, shared: Option<&Shared>) -> Option<Failure> {
    held.state = HandleState::Released;
    let outcome = catch_unwind(AssertUnwindSafe(|| held.slot.release()))
        .unwrap_or_else(|payload| Err(panic_cause(payload)));

    match outcome {
        Ok(()) => {
            tracing::debug!(scope = %scope, handle = %held.id, label = %held.label, "Released resource");
            if let Some(shared) = shared {
                shared.handle_released(scope, held.id, &held.label);
            }
            None
        }
        Err(error) => {
            let failure =
                Failure::from_box(Stage::Release, Some(held.id), Arc::clone(&held.label), error);
            tracing::debug!(scope = %scope, failure = %failure, "Release failed");
            if let Some(shared) = shared {
                shared.release_failed(scope, held.id, &held.label, &failure);
            }
            Some(failure)
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(error) = self.close() {
            tracing::warn!(scope = %self.id, error = %error, "Scope dropped with unreported teardown failure");
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("open", &self.open_count())
            .field("closed", &self.closed)
            .field("primary", &self.primary)
            .field("suppressed", &self.suppressed.len())
            .finish()
    }
}
