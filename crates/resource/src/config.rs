//! Runtime configuration types

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for a [`ResourceRuntime`](crate::ResourceRuntime)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Safety-net registry settings
    pub safety_net: SafetyNetConfig,
    /// Weak cache settings
    pub cache: CacheConfig,
    /// Lifecycle event bus settings
    pub events: EventsConfig,
}

impl Config {
    /// Check every section.
    pub fn validate(&self) -> Result<()> {
        self.safety_net.validate()?;
        self.events.validate()
    }
}

/// Safety-net registry settings
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SafetyNetConfig {
    /// Period of the background reaper. `None` disables the thread; passes
    /// then run only through `reclaim()`.
    pub reap_interval: Option<Duration>,
    /// Run every still-armed cleanup when the registry shuts down
    pub run_pending_on_shutdown: bool,
}

impl SafetyNetConfig {
    /// No reaper thread; reclamation is driven by the caller.
    #[must_use]
    pub fn manual() -> Self {
        Self {
            reap_interval: None,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.reap_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(Error::configuration(
                "safety_net.reap_interval must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for SafetyNetConfig {
    fn default() -> Self {
        Self {
            reap_interval: Some(Duration::from_millis(250)),
            run_pending_on_shutdown: false,
        }
    }
}

/// Weak cache settings
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CacheConfig {
    /// Slots reserved up front
    pub initial_capacity: usize,
    /// Purge dead entries every this many inserts; `0` disables
    pub purge_every: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 64,
            purge_every: 64,
        }
    }
}

/// Lifecycle event bus settings
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EventsConfig {
    /// Broadcast buffer; slow subscribers lag past this many events
    pub buffer_size: usize,
}

impl EventsConfig {
    fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::configuration(
                "events.buffer_size must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { buffer_size: 1024 }
    }
}
