//! Listener registry with manual lifetime discipline.
//!
//! Unlike [`SafetyNetRegistry`](crate::SafetyNetRegistry) and
//! [`WeakCache`](crate::WeakCache), this registry holds its listeners
//! *strongly*. A registered listener lives as long as the registry unless it
//! is removed, so callers must call [`ListenerRegistry::remove`] when a
//! listener is done. Nothing is reclaimed automatically.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::error::{BoxError, Cause, panic_cause};

// ---------------------------------------------------------------------------
// Listener trait
// ---------------------------------------------------------------------------

/// Receiver of events of type `E`.
pub trait Listener<E>: Send + Sync {
    /// Human-readable name, used in failure reports.
    fn name(&self) -> &str;

    /// Handle one event.
    fn on_event(&self, event: &E) -> Result<(), BoxError>;
}

/// Listener backed by a closure.
pub struct FnListener<F> {
    name: String,
    f: F,
}

impl<F> FnListener<F> {
    /// Wrap `f` under `name`.
    pub fn new<E>(name: impl Into<String>, f: F) -> Arc<Self>
    where
        F: Fn(&E) -> Result<(), BoxError> + Send + Sync,
    {
        Arc::new(Self {
            name: name.into(),
            f,
        })
    }
}

impl<E, F> Listener<E> for FnListener<F>
where
    F: Fn(&E) -> Result<(), BoxError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, event: &E) -> Result<(), BoxError> {
        (self.f)(event)
    }
}

// ---------------------------------------------------------------------------
// NotifyError
// ---------------------------------------------------------------------------

/// One listener that failed during a delivery pass.
#[derive(Debug, Clone)]
pub struct ListenerFailure {
    /// Position of the listener in registration order.
    pub position: usize,
    /// The listener's name.
    pub name: String,
    /// What went wrong (error or panic).
    pub cause: Cause,
}

/// Failures collected over a complete delivery pass.
#[derive(Error, Debug, Clone)]
#[error("{} of {attempted} listeners failed", failures.len())]
pub struct NotifyError {
    /// Listeners the event was offered to.
    pub attempted: usize,
    /// Failed listeners, in registration order.
    pub failures: Vec<ListenerFailure>,
}

impl NotifyError {
    /// Number of listeners that handled the event successfully.
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.attempted - self.failures.len()
    }
}

// ---------------------------------------------------------------------------
// ListenerRegistry
// ---------------------------------------------------------------------------

/// Compares allocation addresses; vtable pointers are not stable identities.
fn same_listener<A: ?Sized, B: ?Sized>(a: &Arc<A>, b: &Arc<B>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

/// Ordered set of strongly held listeners.
///
/// Registration is protected by an `RwLock`; delivery snapshots the list and
/// releases the lock before calling listeners, so a listener may add or
/// remove listeners while being notified.
pub struct ListenerRegistry<E> {
    listeners: RwLock<Vec<Arc<dyn Listener<E>>>>,
}

impl<E: 'static> ListenerRegistry<E> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Append `listener`. Returns `false` if that same listener is already
    /// registered.
    pub fn add<L>(&self, listener: Arc<L>) -> bool
    where
        L: Listener<E> + 'static,
    {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Remove `listener` by identity. Returns `false` if it was not registered.
    pub fn remove<L: ?Sized>(&self, listener: &Arc<L>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    /// Deliver `event` to every listener in registration order.
    ///
    /// A failing or panicking listener does not stop the pass. Returns the
    /// number of listeners that handled the event, or every failure once the
    /// pass is complete.
    pub fn notify_all(&self, event: &E) -> Result<usize, NotifyError> {
        let snapshot: Vec<Arc<dyn Listener<E>>> = self.listeners.read().clone();

        let mut failures = Vec::new();
        for (position, listener) in snapshot.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_event(event)))
                .unwrap_or_else(|payload| Err(panic_cause(payload)));
            if let Err(error) = outcome {
                tracing::warn!(
                    listener = listener.name(),
                    position,
                    error = %error,
                    "Listener failed"
                );
                failures.push(ListenerFailure {
                    position,
                    name: listener.name().to_string(),
                    cause: Arc::from(error),
                });
            }
        }

        if failures.is_empty() {
            Ok(snapshot.len())
        } else {
            Err(NotifyError {
                attempted: snapshot.len(),
                failures,
            })
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}

impl<E: 'static> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ListenerRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .listeners
            .read()
            .iter()
            .map(|l| l.name().to_string())
            .collect();
        f.debug_struct("ListenerRegistry")
            .field("listeners", &names)
            .finish()
    }
}
