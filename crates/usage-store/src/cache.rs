//! Expiring key/value cache
//!
//! Every entry carries its own expiry, and the cache as a whole carries a
//! single global expiry that is overwritten by every `set`, whichever key is
//! written. A lookup misses (and evicts the key) when either deadline has
//! passed, so a short-TTL write invalidates longer-lived entries early.
//! `is_expired` reports the global deadline; the inventory refreshes on it.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expiry: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expiry: Instant::now() + ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now > self.expiry
    }
}

#[derive(Debug)]
struct CacheState<K, V> {
    items: HashMap<K, CacheEntry<V>>,
    /// Expiry requested by the most recent `set`; `None` until the first write
    global_expiry: Option<Instant>,
}

impl<K, V> CacheState<K, V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.global_expiry.map_or(true, |expiry| now > expiry)
    }
}

/// Thread-safe cache with per-key and cache-wide expiry
///
/// All operations on one instance are serialized by a single mutex.
#[derive(Debug)]
pub struct ExpiringCache<K, V> {
    state: Mutex<CacheState<K, V>>,
}

impl<K, V> Default for ExpiringCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                items: HashMap::new(),
                global_expiry: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<K, V>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or overwrite `key`, and move the global expiry to `now + ttl`
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let mut state = self.lock();
        state.items.insert(key, CacheEntry::new(value, ttl));
        state.global_expiry = Some(Instant::now() + ttl);
    }

    /// Look up `key`, evicting it if the cache or the entry has expired
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.lock();
        let now = Instant::now();

        let expired = match state.items.get(key) {
            None => return None,
            Some(entry) => state.is_expired(now) || entry.is_expired(now),
        };

        if expired {
            state.items.remove(key);
            return None;
        }

        state.items.get(key).map(|entry| entry.value.clone())
    }

    /// Whether the global expiry has passed (true for a cache never written)
    pub fn is_expired(&self) -> bool {
        self.lock().is_expired(Instant::now())
    }

    /// Number of stored entries, expired or not
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Point-in-time snapshot of the stored keys
    pub fn keys(&self) -> Vec<K> {
        self.lock().items.keys().cloned().collect()
    }
}
