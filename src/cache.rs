use dashmap::DashMap;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

use crate::metrics::CACHE_SIZE;

// Key the dashboard stats are stored under
pub const DASHBOARD_CACHE_KEY: &str = "dashboard_data";

// Cache entry with timestamp
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub data: Value,
    pub timestamp: i64,      // ms since epoch, reported to clients
    pub created_at: Instant, // monotonic, used for freshness
}

impl CacheEntry {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
            created_at: Instant::now(),
        }
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() < ttl
    }

    pub fn remaining(&self, ttl: Duration) -> Duration {
        ttl.saturating_sub(self.created_at.elapsed())
    }

    // Whole seconds left, rounded up so a brand new entry reports the full ttl
    pub fn remaining_secs(&self, ttl: Duration) -> u64 {
        let ms = self.remaining(ttl).as_millis() as u64;
        ms.div_ceil(1000)
    }
}

/// Entry the dashboard limiter found fresh, passed on to the handler as a
/// request extension.
#[derive(Clone, Debug)]
pub struct FreshEntry(pub CacheEntry);

/// Keyed store holding at most one entry per key.
///
/// `set` always overwrites. Entries are never removed, a stale entry just
/// sits there until the next `set` for the same key replaces it.
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn get_fresh(&self, key: &str) -> Option<CacheEntry> {
        self.get(key).filter(|entry| entry.is_fresh(self.ttl))
    }

    pub fn is_fresh(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.is_fresh(self.ttl))
    }

    pub fn set(&self, key: &str, data: Value) -> CacheEntry {
        let entry = CacheEntry::new(data);
        self.entries.insert(key.to_string(), entry.clone());
        CACHE_SIZE.set(self.entries.len() as f64);
        entry
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test(start_paused = true)]
    async fn get_after_set_returns_same_data() {
        let cache = ResponseCache::new(TTL);
        cache.set("k", json!({ "orders": 12 }));

        tokio::time::advance(Duration::from_secs(299)).await;

        let entry = cache.get_fresh("k").expect("entry should still be fresh");
        assert_eq!(entry.data, json!({ "orders": 12 }));
        assert!(cache.is_fresh("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn entry_goes_stale_after_ttl() {
        let cache = ResponseCache::new(TTL);
        cache.set("k", json!(1));

        tokio::time::advance(TTL).await;

        assert!(!cache.is_fresh("k"));
        assert!(cache.get_fresh("k").is_none());
        // still stored, just superseded on the next set
        assert!(cache.get("k").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn set_overwrites_instead_of_merging() {
        let cache = ResponseCache::new(TTL);
        cache.set("k", json!({ "a": 1 }));
        cache.set("k", json!({ "b": 2 }));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k").unwrap().data, json!({ "b": 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_counts_down() {
        let cache = ResponseCache::new(TTL);
        let entry = cache.set("k", json!(null));
        assert_eq!(entry.remaining_secs(TTL), 300);

        tokio::time::advance(Duration::from_millis(100_500)).await;
        assert_eq!(entry.remaining_secs(TTL), 200);

        tokio::time::advance(Duration::from_secs(500)).await;
        assert_eq!(entry.remaining(TTL), Duration::ZERO);
    }

    #[test]
    fn missing_key_is_not_fresh() {
        let cache = ResponseCache::new(TTL);
        assert!(cache.is_empty());
        assert!(!cache.is_fresh(DASHBOARD_CACHE_KEY));
    }
}
