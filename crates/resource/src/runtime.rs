//! Process-wide lifecycle state.
//!
//! [`ResourceRuntime`] owns one event bus, one scope manager and one
//! safety-net registry, wired together from a single [`Config`]. Caches and
//! listener registries are created through it so they pick up the same
//! settings, but each is owned by the caller.

use std::fmt;
use std::sync::Arc;

use crate::cache::WeakCache;
use crate::config::Config;
use crate::error::Result;
use crate::events::EventBus;
use crate::listener::ListenerRegistry;
use crate::manager::ScopeManager;
use crate::safety_net::SafetyNetRegistry;

/// Shared lifecycle services built from one [`Config`].
pub struct ResourceRuntime {
    config: Config,
    events: Arc<EventBus>,
    scopes: ScopeManager,
    safety_net: SafetyNetRegistry,
}

impl ResourceRuntime {
    /// Validate `config` and start the services.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let events = Arc::new(EventBus::new(config.events.buffer_size));
        let scopes = ScopeManager::with_events(Arc::clone(&events));
        let safety_net = SafetyNetRegistry::with_events(&config.safety_net, Arc::clone(&events));

        tracing::info!(
            reap_interval = ?config.safety_net.reap_interval,
            event_buffer = config.events.buffer_size,
            "Resource runtime started"
        );

        Ok(Self {
            config,
            events,
            scopes,
            safety_net,
        })
    }

    /// Configuration the runtime was built from.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Scope manager reporting into this runtime's event bus.
    #[must_use]
    pub fn scopes(&self) -> &ScopeManager {
        &self.scopes
    }

    /// Safety-net registry; its reaper follows `safety_net.reap_interval`.
    #[must_use]
    pub fn safety_net(&self) -> &SafetyNetRegistry {
        &self.safety_net
    }

    /// Bus carrying scope and safety-net events.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// New weak cache sized from the cache settings.
    #[must_use]
    pub fn cache<K: ?Sized, V>(&self) -> WeakCache<K, V> {
        WeakCache::with_config(&self.config.cache)
    }

    /// New, empty listener registry.
    #[must_use]
    pub fn listeners<E: 'static>(&self) -> ListenerRegistry<E> {
        ListenerRegistry::new()
    }

    /// Stop the reaper and apply the shutdown policy for pending cleanups.
    pub fn shutdown(&self) {
        self.safety_net.shutdown();
        tracing::info!(stats = ?self.scopes.stats(), "Resource runtime stopped");
    }
}

impl fmt::Debug for ResourceRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRuntime")
            .field("scopes", &self.scopes)
            .field("safety_net", &self.safety_net)
            .field("subscribers", &self.events.subscriber_count())
            .finish_non_exhaustive()
    }
}
