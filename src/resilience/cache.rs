//! Bounded LRU cache with optional per-entry expiry.
//!
//! Expiry is enforced lazily on `get` (an expired entry reads as absent and
//! is evicted as a side effect); `cleanup` exists for periodic background
//! scans but is not load-bearing for correctness.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;

use super::clock::SharedClock;
use super::lock::mutex_lock;

const SOURCE: &str = "resilience::cache";

struct Entry<V> {
    value: V,
    expires_at_millis: Option<u64>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now_millis: u64) -> bool {
        self.expires_at_millis.is_some_and(|at| at <= now_millis)
    }
}

pub struct TtlCache<K: Hash + Eq + Clone, V: Clone> {
    entries: Mutex<LruCache<K, Entry<V>>>,
    default_ttl: Option<Duration>,
    clock: SharedClock,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(capacity: NonZeroUsize, default_ttl: Option<Duration>, clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl,
            clock,
        }
    }

    /// Look up a key, treating an expired entry as absent and evicting it.
    /// A hit promotes the entry to most-recently-used.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now_millis();
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");
        let expired = match entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return None,
        };
        if expired {
            entries.pop(key);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert with the cache's default TTL.
    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    /// Insert with an explicit TTL. `None` or a zero duration means no expiry
    /// (the entry is bounded only by LRU pressure). Inserting at capacity
    /// evicts the least-recently-used entry first; re-inserting an existing
    /// key re-positions it most-recently-used.
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) {
        let expires_at_millis = ttl
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| self.clock.now_millis() + ttl.as_millis() as u64);
        let mut entries = mutex_lock(&self.entries, SOURCE, "insert");
        entries.put(
            key,
            Entry {
                value,
                expires_at_millis,
            },
        );
    }

    /// Whether a live entry exists for `key`. Does not promote and does not
    /// evict; expired entries simply read as absent.
    pub fn contains(&self, key: &K) -> bool {
        let now = self.clock.now_millis();
        let entries = mutex_lock(&self.entries, SOURCE, "contains");
        entries.peek(key).is_some_and(|entry| !entry.is_expired(now))
    }

    pub fn remove(&self, key: &K) -> bool {
        mutex_lock(&self.entries, SOURCE, "remove").pop(key).is_some()
    }

    pub fn clear(&self) {
        mutex_lock(&self.entries, SOURCE, "clear").clear();
    }

    /// Number of stored entries, counting expired ones not yet collected.
    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full scan removing every expired entry, independent of access pattern.
    /// Returns how many entries were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now_millis();
        let mut entries = mutex_lock(&self.entries, SOURCE, "cleanup");
        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }
}
