//! Event broadcasting for resource lifecycle observability.
//!
//! Provides [`LifecycleEvent`] variants emitted by scopes and the safety net,
//! and an [`EventBus`] backed by `tokio::sync::broadcast`. The bus is the
//! out-of-band channel for safety-net faults, which have no caller to return
//! to.

use tokio::sync::broadcast;

use crate::handle::HandleId;
use crate::safety_net::{EntryId, Trigger};
use crate::scope::ScopeId;

// ---------------------------------------------------------------------------
// LifecycleEvent
// ---------------------------------------------------------------------------

/// Events emitted during resource lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A scope was opened.
    ScopeOpened {
        /// The new scope.
        scope: ScopeId,
    },
    /// A scope finished teardown.
    ScopeClosed {
        /// The scope.
        scope: ScopeId,
        /// Number of handles released during teardown.
        released: usize,
        /// Number of release actions that failed during teardown.
        failed: usize,
    },
    /// A handle's release action completed successfully.
    HandleReleased {
        /// Owning scope.
        scope: ScopeId,
        /// The handle.
        handle: HandleId,
        /// Resource label.
        label: String,
    },
    /// A handle's release action failed.
    ReleaseFailed {
        /// Owning scope.
        scope: ScopeId,
        /// The handle.
        handle: HandleId,
        /// Resource label.
        label: String,
        /// Human-readable error description.
        error: String,
    },
    /// A safety-net cleanup ran.
    SafetyNetFired {
        /// The registry entry.
        entry: EntryId,
        /// Entry label.
        label: String,
        /// What ran it.
        trigger: Trigger,
    },
    /// A safety-net cleanup failed or panicked.
    SafetyNetFault {
        /// The registry entry.
        entry: EntryId,
        /// Entry label.
        label: String,
        /// Human-readable error description.
        error: String,
    },
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast-based event bus for lifecycle events.
///
/// Emission is fire-and-forget: if no subscribers are listening or the
/// channel is full, events are silently dropped (no backpressure on the
/// emitter). Works without a running tokio runtime; only `recv` is async.
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    ///
    /// # Panics
    /// Panics if `buffer_size` is zero. [`Config::validate`](crate::Config::validate)
    /// rejects that before a runtime builds its bus.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: LifecycleEvent) {
        // No receivers is not an error for the emitter.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}
