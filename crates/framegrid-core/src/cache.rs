//! Bounded time-to-live cache shared by the query, pair and path caches.
//!
//! Entries are only ever invalidated by expiry or explicit removal; callers
//! that need fresher data must evict it themselves.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: f64,
}

/// `HashMap` with per-entry expiry and a capacity bound.
#[derive(Debug, Clone)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    ttl: f64,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl<K: Eq + Hash + Clone, V> TtlCache<K, V> {
    pub fn new(ttl: f64, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            capacity: capacity.max(1),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a live entry. Expired entries are dropped on access.
    pub fn get(&mut self, key: &K, now: f64) -> Option<&V> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.expires_at <= now,
            None => {
                self.misses += 1;
                return None;
            }
        };
        if expired {
            self.entries.remove(key);
            self.misses += 1;
            return None;
        }
        self.hits += 1;
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn insert(&mut self, key: K, value: V, now: f64) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.evict(now);
        }
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|e| e.value)
    }

    /// Drop every entry whose key fails `keep`.
    pub fn retain_keys(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.entries.retain(|k, _| keep(k));
    }

    /// Drop all expired entries, returning how many were removed.
    pub fn purge_expired(&mut self, now: f64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Fraction of lookups served from the cache (0 when never queried).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    fn evict(&mut self, now: f64) {
        if self.purge_expired(now) > 0 {
            return;
        }
        // Full of live entries: drop the one closest to expiry.
        let oldest = self
            .entries
            .iter()
            .min_by(|a, b| a.1.expires_at.total_cmp(&b.1.expires_at))
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_within_ttl() {
        let mut cache = TtlCache::new(1.0, 8);
        cache.insert("a", 1, 0.0);
        assert_eq!(cache.get(&"a", 0.5), Some(&1));
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn test_expired_entry_is_miss() {
        let mut cache = TtlCache::new(1.0, 8);
        cache.insert("a", 1, 0.0);
        assert_eq!(cache.get(&"a", 1.0), None);
        assert!(cache.is_empty());
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut cache = TtlCache::new(10.0, 2);
        cache.insert(1, "one", 0.0);
        cache.insert(2, "two", 1.0);
        cache.insert(3, "three", 2.0);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1, 2.0), None);
        assert_eq!(cache.get(&3, 2.0), Some(&"three"));
    }

    #[test]
    fn test_capacity_prefers_expired() {
        let mut cache = TtlCache::new(1.0, 2);
        cache.insert(1, "one", 0.0);
        cache.insert(2, "two", 5.0);
        cache.insert(3, "three", 5.5);
        assert_eq!(cache.get(&2, 5.5), Some(&"two"));
        assert_eq!(cache.get(&3, 5.5), Some(&"three"));
    }

    #[test]
    fn test_hit_rate() {
        let mut cache: TtlCache<u32, u32> = TtlCache::new(1.0, 4);
        assert_eq!(cache.hit_rate(), 0.0);
        cache.insert(1, 1, 0.0);
        cache.get(&1, 0.0);
        cache.get(&2, 0.0);
        assert!((cache.hit_rate() - 0.5).abs() < 1e-9);
    }
}
