//! Identity-keyed cache whose entries die with their keys
//!
//! [`WeakCache`] holds keys through `Weak`, so caching never extends a key's
//! life. Once every outside `Arc` to a key is dropped, its entry is dead:
//! lookups can no longer reach it (the caller would need the key to ask) and
//! the next purge removes it. Purges run on [`len`](WeakCache::len),
//! [`purge`](WeakCache::purge), [`retain`](WeakCache::retain) and every
//! `purge_every` inserts.
//!
//! Lookup is by key *identity*, not equality: two equal keys in separate
//! allocations have independent lifetimes and are separate entries.
//!
//! Values are held strongly. A value that owns an `Arc` to its own key keeps
//! that key reachable and is never evicted.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::config::CacheConfig;

struct Slot<K: ?Sized, V> {
    key: Weak<K>,
    value: V,
}

impl<K: ?Sized, V> Slot<K, V> {
    fn is_live(&self) -> bool {
        self.key.strong_count() > 0
    }
}

/// Identity of an `Arc` allocation.
///
/// The cache's own `Weak` keeps the allocation from being freed, so an
/// address cannot be reused by another key while its slot exists.
fn address<K: ?Sized>(key: &Arc<K>) -> usize {
    Arc::as_ptr(key).cast::<()>() as usize
}

/// Point-in-time counters of a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries removed because their key died.
    pub evictions: u64,
}

/// Cache keyed by `Arc` identity with weakly held keys.
pub struct WeakCache<K: ?Sized, V> {
    entries: DashMap<usize, Slot<K, V>>,
    purge_every: u64,
    inserts: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K: ?Sized, V> WeakCache<K, V> {
    /// Create an empty cache with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    /// Create an empty cache.
    #[must_use]
    pub fn with_config(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::with_capacity(config.initial_capacity),
            purge_every: config.purge_every as u64,
            inserts: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Insert or replace the value for `key`, returning the previous one.
    ///
    /// Only a `Weak` to `key` is stored.
    pub fn put(&self, key: &Arc<K>, value: V) -> Option<V> {
        let previous = self
            .entries
            .insert(
                address(key),
                Slot {
                    key: Arc::downgrade(key),
                    value,
                },
            )
            .map(|slot| slot.value);

        let inserts = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
        if self.purge_every > 0 && inserts % self.purge_every == 0 {
            self.purge();
        }
        previous
    }

    /// Remove the entry for `key`.
    pub fn remove(&self, key: &Arc<K>) -> Option<V> {
        self.entries
            .remove(&address(key))
            .map(|(_, slot)| slot.value)
    }

    /// Whether `key` has an entry.
    #[must_use]
    pub fn contains_key(&self, key: &Arc<K>) -> bool {
        self.entries
            .get(&address(key))
            .is_some_and(|slot| slot.is_live())
    }

    /// Number of live entries. Purges dead entries first.
    #[must_use]
    pub fn len(&self) -> usize {
        self.purge();
        self.entries.len()
    }

    /// Whether the cache has no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry whose key has died. Returns how many were removed.
    pub fn purge(&self) -> usize {
        let mut evicted = 0;
        self.entries.retain(|_, slot| {
            let live = slot.is_live();
            if !live {
                evicted += 1;
            }
            live
        });
        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            tracing::trace!(evicted, "Purged dead cache entries");
        }
        evicted
    }

    /// Keep only live entries whose value satisfies `keep`.
    ///
    /// Removals by `keep` are not counted as evictions.
    pub fn retain<F>(&self, mut keep: F)
    where
        F: FnMut(&V) -> bool,
    {
        self.purge();
        self.entries.retain(|_, slot| keep(&slot.value));
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl<K: ?Sized, V: Clone> WeakCache<K, V> {
    /// Clone of the value cached for `key`.
    pub fn get(&self, key: &Arc<K>) -> Option<V> {
        let found = self
            .entries
            .get(&address(key))
            .filter(|slot| slot.is_live())
            .map(|slot| slot.value.clone());

        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Cached value for `key`, inserting `make()` on a miss.
    ///
    /// Under a race both callers may run `make`; the first insert wins and
    /// both get its value.
    pub fn get_or_insert_with<F>(&self, key: &Arc<K>, make: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(key) {
            return value;
        }
        let value = make();
        self.entries
            .entry(address(key))
            .or_insert_with(|| Slot {
                key: Arc::downgrade(key),
                value,
            })
            .value
            .clone()
    }
}

impl<K: ?Sized, V> Default for WeakCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ?Sized, V> fmt::Debug for WeakCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakCache")
            .field("entries", &self.entries.len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    struct Animal(&'static str);

    #[test]
    fn get_hits_while_key_is_held() {
        let cache = WeakCache::new();
        let dog = Arc::new(Animal("dog"));
        cache.put(&dog, "woof");
        assert_eq!(cache.get(&dog), Some("woof"));
        assert_eq!(Arc::strong_count(&dog), 1);
    }

    #[test]
    fn entry_dies_with_key() {
        let cache = WeakCache::new();
        let bird = Arc::new(Animal("bird"));
        let fish = Arc::new(Animal("fish"));
        cache.put(&bird, "tweet");
        cache.put(&fish, "blub");
        assert_eq!(cache.len(), 2);

        drop(bird);
        drop(fish);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn equal_keys_are_distinct_entries() {
        let cache = WeakCache::new();
        let first = Arc::new(Animal("cat"));
        let second = Arc::new(Animal("cat"));
        assert_eq!(first, second);

        cache.put(&first, 1);
        assert_eq!(cache.get(&second), None);
        cache.put(&second, 2);
        assert_eq!(cache.get(&first), Some(1));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn put_replaces_and_returns_previous() {
        let cache = WeakCache::new();
        let key = Arc::new(Animal("cow"));
        assert_eq!(cache.put(&key, "moo"), None);
        assert_eq!(cache.put(&key, "MOO"), Some("moo"));
        assert_eq!(cache.get(&key), Some("MOO"));
    }

    #[test]
    fn value_owning_its_key_is_never_evicted() {
        let cache: WeakCache<Animal, Arc<Animal>> = WeakCache::new();
        let key = Arc::new(Animal("leak"));
        cache.put(&key, Arc::clone(&key));
        drop(key);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn unsized_keys_are_supported() {
        let cache: WeakCache<str, usize> = WeakCache::new();
        let key: Arc<str> = Arc::from("session-101");
        cache.put(&key, 101);
        assert!(cache.contains_key(&key));
        assert_eq!(cache.remove(&key), Some(101));
        assert!(cache.is_empty());
    }

    #[test]
    fn retain_sweeps_by_value() {
        let cache = WeakCache::new();
        let a = Arc::new(Animal("a"));
        let b = Arc::new(Animal("b"));
        cache.put(&a, true);
        cache.put(&b, false);
        cache.retain(|active| *active);
        assert_eq!(cache.get(&a), Some(true));
        assert_eq!(cache.get(&b), None);
    }

    #[test]
    fn periodic_purge_on_insert() {
        let config = CacheConfig {
            purge_every: 2,
            ..CacheConfig::default()
        };
        let cache = WeakCache::with_config(&config);
        let dead = Arc::new(Animal("gone"));
        cache.put(&dead, 0);
        drop(dead);

        let live = Arc::new(Animal("here"));
        cache.put(&live, 1);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn get_or_insert_with_computes_once() {
        let cache = WeakCache::new();
        let key = Arc::new(Animal("lazy"));
        assert_eq!(cache.get_or_insert_with(&key, || 5), 5);
        assert_eq!(cache.get_or_insert_with(&key, || 6), 5);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
