use std::collections::HashMap;
use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedUrl {
    pub url: String,
    pub resolved_at: DateTime<Utc>,
}

impl CachedUrl {
    pub fn new(url: String) -> Self {
        Self {
            url,
            resolved_at: Utc::now(),
        }
    }

    pub fn age_secs(&self) -> u64 {
        (Utc::now() - self.resolved_at).num_seconds().max(0) as u64
    }
}

enum Store {
    Unbounded(HashMap<String, CachedUrl>),
    Bounded(LruCache<String, CachedUrl>),
}

// Resolved URLs keyed by storage key. Kept for the whole process, never invalidated.
pub struct UrlCache {
    store: Mutex<Store>,
}

impl UrlCache {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store::Unbounded(HashMap::new())),
        }
    }

    /// Least-recently-used eviction once `capacity` keys are held.
    pub fn bounded(capacity: NonZeroUsize) -> Self {
        Self {
            store: Mutex::new(Store::Bounded(LruCache::new(capacity))),
        }
    }

    pub fn get(&self, key: &str) -> Option<CachedUrl> {
        match &mut *self.store.lock() {
            Store::Unbounded(map) => map.get(key).cloned(),
            Store::Bounded(lru) => lru.get(key).cloned(),
        }
    }

    pub fn get_url(&self, key: &str) -> Option<String> {
        self.get(key).map(|entry| entry.url)
    }

    pub fn store_url(&self, key: &str, url: String) {
        let entry = CachedUrl::new(url);
        match &mut *self.store.lock() {
            Store::Unbounded(map) => {
                map.insert(key.to_string(), entry);
            }
            Store::Bounded(lru) => {
                lru.put(key.to_string(), entry);
            }
        }
    }

    pub fn len(&self) -> usize {
        match &*self.store.lock() {
            Store::Unbounded(map) => map.len(),
            Store::Bounded(lru) => lru.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for UrlCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_get() {
        let cache = UrlCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.get_url("k"), None);

        cache.store_url("k", "https://cdn.test/k".to_string());
        assert_eq!(cache.get_url("k").as_deref(), Some("https://cdn.test/k"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k").unwrap().age_secs(), 0);
    }

    #[test]
    fn test_bounded_evicts_least_recently_used() {
        let cache = UrlCache::bounded(NonZeroUsize::new(2).unwrap());
        cache.store_url("a", "https://cdn.test/a".to_string());
        cache.store_url("b", "https://cdn.test/b".to_string());

        // Touch "a" so "b" becomes the eviction candidate
        assert!(cache.get_url("a").is_some());
        cache.store_url("c", "https://cdn.test/c".to_string());

        assert_eq!(cache.len(), 2);
        assert!(cache.get_url("a").is_some());
        assert!(cache.get_url("b").is_none());
        assert!(cache.get_url("c").is_some());
    }
}
