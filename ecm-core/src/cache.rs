//! Process-wide TTL cache with prefix invalidation (Component C).
//!
//! Fronts hot read paths to the upstream API client. Shared,
//! lock-per-instance (a single mutex over the map is adequate at this
//! scale — `spec.md` §5 asks for "lock-per-shard or equivalent", and a
//! bounded entry count keeps contention low); prefix invalidation is
//! O(n) over entries as specified.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// Aggregate cache performance counters.
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn accumulate(&mut self, other: &CacheMetrics) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.evictions += other.evictions;
        self.invalidations += other.invalidations;
    }
}

struct Inner {
    entries: HashMap<String, Entry>,
    metrics: CacheMetrics,
}

/// A TTL cache keyed by string, storing arbitrary JSON values so callers
/// can cache any serializable upstream response shape without a generic
/// parameter per cache instance.
pub struct TtlCache {
    inner: Mutex<Inner>,
    default_ttl: Duration,
    max_entries: usize,
}

impl TtlCache {
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                metrics: CacheMetrics::default(),
            }),
            default_ttl,
            max_entries,
        }
    }

    /// Fetch a cached value, if present and unexpired.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let now = Instant::now();
        match inner.entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                let value = entry.value.clone();
                inner.metrics.hits += 1;
                Some(value)
            }
            Some(_) => {
                inner.entries.remove(key);
                inner.metrics.misses += 1;
                inner.metrics.evictions += 1;
                None
            }
            None => {
                inner.metrics.misses += 1;
                None
            }
        }
    }

    /// Insert a value with the cache's default TTL.
    pub fn put(&self, key: impl Into<String>, value: serde_json::Value) {
        self.put_with_ttl(key, value, self.default_ttl);
    }

    pub fn put_with_ttl(&self, key: impl Into<String>, value: serde_json::Value, ttl: Duration) {
        let key = key.into();
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        if inner.entries.len() >= self.max_entries && !inner.entries.contains_key(&key) {
            evict_oldest(&mut inner.entries);
            inner.metrics.evictions += 1;
        }
        inner.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Invalidate every key sharing the given prefix, O(n) over entries.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let before = inner.entries.len();
        inner.entries.retain(|k, _| !k.starts_with(prefix));
        let removed = before - inner.entries.len();
        inner.metrics.invalidations += removed as u64;
        removed
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let removed = inner.entries.remove(key).is_some();
        if removed {
            inner.metrics.invalidations += 1;
        }
        removed
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.inner.lock().expect("cache mutex poisoned").metrics.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache mutex poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict_oldest(entries: &mut HashMap<String, Entry>) {
    if let Some(key) = entries
        .iter()
        .min_by_key(|(_, e)| e.expires_at)
        .map(|(k, _)| k.clone())
    {
        entries.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let cache = TtlCache::new(Duration::from_secs(60), 100);
        cache.put("channels:1", serde_json::json!({"id": 1}));
        assert_eq!(cache.get("channels:1"), Some(serde_json::json!({"id": 1})));
        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 0);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = TtlCache::new(Duration::from_millis(1), 100);
        cache.put("k", serde_json::json!(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.metrics().misses, 1);
    }

    #[test]
    fn test_prefix_invalidation() {
        let cache = TtlCache::new(Duration::from_secs(60), 100);
        cache.put("channels:1", serde_json::json!(1));
        cache.put("channels:2", serde_json::json!(2));
        cache.put("streams:1", serde_json::json!(3));
        let removed = cache.invalidate_prefix("channels:");
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("streams:1").is_some());
    }

    #[test]
    fn test_hit_rate() {
        let cache = TtlCache::new(Duration::from_secs(60), 100);
        cache.put("k", serde_json::json!(1));
        cache.get("k");
        cache.get("missing");
        assert!((cache.metrics().hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
