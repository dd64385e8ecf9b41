//! Response cache shared by every fetch of a session.
//!
//! Entries are keyed by normalized request URL. The cache also hands out
//! per-key in-flight locks so that concurrent fetches of the same URL result
//! in a single network request: the first caller fetches while holding the
//! lock, later callers wait on it and then read the stored body.

use chrono::{DateTime, Utc};
use http_types::Url;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;

/// A stored response body.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub body: String,
    pub fetched_at: DateTime<Utc>,
    /// Insertion order, used by eviction policies to break timestamp ties
    pub sequence: u64,
}

/// Decides which entries to drop after an insert.
///
/// Called with the cache's write lock held; implementations must not block.
pub trait EvictionPolicy: Debug + Send + Sync {
    fn select_victims(&self, entries: &HashMap<String, CacheEntry>) -> Vec<String>;
}

/// Never evicts. The cache lives as long as the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

impl EvictionPolicy for Unbounded {
    fn select_victims(&self, _entries: &HashMap<String, CacheEntry>) -> Vec<String> {
        Vec::new()
    }
}

/// Keeps at most `n` entries, dropping the oldest fetched first.
#[derive(Debug, Clone, Copy)]
pub struct MaxEntries(pub usize);

impl EvictionPolicy for MaxEntries {
    fn select_victims(&self, entries: &HashMap<String, CacheEntry>) -> Vec<String> {
        if entries.len() <= self.0 {
            return Vec::new();
        }
        let mut by_age: Vec<(&String, &CacheEntry)> = entries.iter().collect();
        by_age.sort_by_key(|(_, entry)| (entry.fetched_at, entry.sequence));
        by_age
            .into_iter()
            .take(entries.len() - self.0)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// Normalize a URL into a cache key.
///
/// Scheme and host are lower-cased by URL parsing and fragments are dropped.
/// Strings that do not parse as URLs are used trimmed, as-is.
pub fn cache_key(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.trim().to_string(),
    }
}

/// URL-keyed response cache with in-flight de-duplication.
#[derive(Debug)]
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    policy: Box<dyn EvictionPolicy>,
    sequence: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache {
    /// Create an unbounded cache.
    pub fn new() -> Self {
        Self::with_policy(Box::new(Unbounded))
    }

    pub fn with_policy(policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            policy,
            sequence: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a key, counting the hit or miss.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let entry = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned();
        match entry {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        entry
    }

    /// Look up a key without touching the hit/miss counters.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Store a body. The first writer for a key wins; later writes are ignored
    /// and the stored entry is returned.
    pub fn insert(&self, key: &str, body: String) -> CacheEntry {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = entries.get(key) {
            log::trace!("Cache already holds {key}; keeping first entry");
            return existing.clone();
        }

        let entry = CacheEntry {
            body,
            fetched_at: Utc::now(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        entries.insert(key.to_string(), entry.clone());

        let victims = self.policy.select_victims(&entries);
        for victim in &victims {
            entries.remove(victim);
        }
        if !victims.is_empty() {
            log::debug!("Evicted {} cache entries", victims.len());
        }

        entry
    }

    /// Acquire the in-flight lock for a key.
    ///
    /// While the returned guard lives, other callers asking for the same key
    /// wait here. Re-check the cache after acquiring: a previous holder may
    /// have stored the body already.
    pub async fn lock_key(&self, key: &str) -> InFlightGuard<'_> {
        let lock = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let guard = lock.clone().lock_owned().await;
        InFlightGuard {
            cache: self,
            key: key.to_string(),
            lock,
            _guard: guard,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Drop the key's lock from the in-flight table once nobody else waits on it.
    fn release_key(&self, key: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let idle = in_flight
            .get(key)
            .map(|current| Arc::ptr_eq(current, lock) && Arc::strong_count(lock) <= 3)
            .unwrap_or(false);
        if idle {
            in_flight.remove(key);
        }
    }
}

/// Holds the in-flight lock for one cache key; released on drop.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    cache: &'a ResponseCache,
    key: String,
    // Held by the table, by `_guard` and here; any extra count is a waiter.
    lock: Arc<tokio::sync::Mutex<()>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.cache.release_key(&self.key, &self.lock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_normalization() {
        assert_eq!(
            cache_key(" HTTPS://Catalog.Test/track/a/1#details "),
            "https://catalog.test/track/a/1"
        );
        assert_eq!(cache_key("not a url"), "not a url");
    }

    #[test]
    fn test_get_counts_hits_and_misses() {
        let cache = ResponseCache::new();
        assert!(cache.get("k").is_none());
        cache.insert("k", "body".to_string());
        assert_eq!(cache.get("k").map(|e| e.body), Some("body".to_string()));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_first_writer_wins() {
        let cache = ResponseCache::new();
        cache.insert("k", "first".to_string());
        let kept = cache.insert("k", "second".to_string());
        assert_eq!(kept.body, "first");
        assert_eq!(cache.peek("k").unwrap().body, "first");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_max_entries_evicts_oldest() {
        let cache = ResponseCache::with_policy(Box::new(MaxEntries(2)));
        cache.insert("a", "1".to_string());
        cache.insert("b", "2".to_string());
        cache.insert("c", "3".to_string());

        assert_eq!(cache.len(), 2);
        assert!(cache.peek("a").is_none());
        assert!(cache.peek("b").is_some());
        assert!(cache.peek("c").is_some());
    }

    #[tokio::test]
    async fn test_lock_key_serializes_same_key() {
        let cache = Arc::new(ResponseCache::new());
        let guard = cache.lock_key("k").await;

        let waiter_cache = cache.clone();
        let waiter = tokio::spawn(async move {
            let _guard = waiter_cache.lock_key("k").await;
            waiter_cache.peek("k").map(|e| e.body)
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        cache.insert("k", "stored".to_string());
        drop(guard);

        assert_eq!(waiter.await.unwrap(), Some("stored".to_string()));
    }
}
