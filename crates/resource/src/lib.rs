//! # Reclaim Resource
//!
//! Deterministic and fallback lifecycle management for resources that hold
//! something outside the process: files, sockets, native buffers.
//!
//! - [`Scope`] / [`ScopeManager`]: the primary path. Resources acquired in a
//!   scope are released in reverse acquisition order on every exit path, and
//!   failures are folded into one primary failure with the rest suppressed.
//! - [`SafetyNetRegistry`]: a one-shot fallback cleanup keyed on owner
//!   reachability, for resources whose owner forgot to release them.
//! - [`WeakCache`]: an identity-keyed cache that never keeps its keys alive.
//! - [`ListenerRegistry`]: strongly held listeners with explicit removal and
//!   complete-pass delivery.
//!
//! ```
//! use reclaim_resource::{ReleaseAction, ScopeManager};
//!
//! let manager = ScopeManager::new();
//! let len = manager
//!     .scoped(|scope| {
//!         let h = scope.acquire("buffer", vec![1u8, 2, 3], ReleaseAction::noop())?;
//!         scope.with(&h, |buf| Ok::<_, std::io::Error>(buf.len()))
//!     })
//!     .unwrap();
//! assert_eq!(len, 3);
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod handle;
pub mod listener;
pub mod manager;
pub mod release;
pub mod runtime;
pub mod safety_net;
pub mod scope;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache::{CacheStats, WeakCache};
pub use config::{CacheConfig, Config, EventsConfig, SafetyNetConfig};
pub use error::{BoxError, Cause, Error, Failure, Result, Stage, TeardownFailure};
pub use events::{EventBus, LifecycleEvent};
pub use handle::{Handle, HandleId, HandleState};
pub use listener::{FnListener, Listener, ListenerFailure, ListenerRegistry, NotifyError};
pub use manager::{ScopeManager, ScopeStats};
pub use release::{Releasable, ReleaseAction};
pub use runtime::ResourceRuntime;
pub use safety_net::{
    Cleanable, EntryId, ReclaimReport, SafetyNetRegistry, SafetyNetStats, Trigger,
};
pub use scope::{Scope, ScopeId};
