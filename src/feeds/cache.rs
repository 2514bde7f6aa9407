use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Capacity-bounded map whose entries expire after a fixed time-to-live.
///
/// Expiry is checked on read. When full, the oldest insertion is evicted.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<K, (V, Instant)>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ttl,
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn get_at(&mut self, key: &K, now: Instant) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some((_, stored)) => now.saturating_duration_since(*stored) >= self.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|(v, _)| v.clone())
    }

    fn insert_at(&mut self, key: K, value: V, now: Instant) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.purge_expired(now);
            if self.entries.len() >= self.capacity {
                self.evict_oldest();
            }
        }
        self.entries.insert(key, (value, now));
    }

    fn purge_expired(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, (_, stored)| now.saturating_duration_since(*stored) < ttl);
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, (_, stored))| *stored)
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
    fn test_expires_on_read() {
        let mut cache = TtlCache::new(4, Duration::from_secs(60));
        let t0 = Instant::now();
        cache.insert_at("SPY", 1, t0);
        assert_eq!(cache.get_at(&"SPY", t0 + Duration::from_secs(30)), Some(1));
        assert_eq!(cache.get_at(&"SPY", t0 + Duration::from_secs(61)), None);
        assert_eq!(cache.len(), 0, "expired entry should be dropped on read");
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let mut cache = TtlCache::new(2, Duration::from_secs(600));
        let t0 = Instant::now();
        cache.insert_at("a", 1, t0);
        cache.insert_at("b", 2, t0 + Duration::from_secs(1));
        cache.insert_at("c", 3, t0 + Duration::from_secs(2));
        let now = t0 + Duration::from_secs(3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at(&"a", now), None);
        assert_eq!(cache.get_at(&"b", now), Some(2));
        assert_eq!(cache.get_at(&"c", now), Some(3));
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let mut cache = TtlCache::new(2, Duration::from_secs(600));
        let t0 = Instant::now();
        cache.insert_at("a", 1, t0);
        cache.insert_at("b", 2, t0);
        cache.insert_at("a", 10, t0 + Duration::from_secs(1));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at(&"a", t0 + Duration::from_secs(2)), Some(10));
        assert_eq!(cache.get_at(&"b", t0 + Duration::from_secs(2)), Some(2));
    }

    #[test]
    fn test_expired_entries_make_room_first() {
        let mut cache = TtlCache::new(2, Duration::from_secs(10));
        let t0 = Instant::now();
        cache.insert_at("old", 1, t0);
        cache.insert_at("fresh", 2, t0 + Duration::from_secs(9));
        cache.insert_at("new", 3, t0 + Duration::from_secs(11));
        let now = t0 + Duration::from_secs(12);
        assert_eq!(cache.get_at(&"fresh", now), Some(2));
        assert_eq!(cache.get_at(&"new", now), Some(3));
    }
}
