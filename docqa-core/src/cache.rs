//! Per-document index cache.
//!
//! An explicitly owned cache object with a `get`/`put`/`evict` contract and
//! a TTL, passed into the engine at construction time. The clock is a trait
//! so tests can inject a fake and drive expiry deterministically.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::CacheConfig;
use crate::index::DocumentIndex;

/// Source of monotonic time for TTL checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct CacheEntry {
    index: Arc<DocumentIndex>,
    inserted_at: Instant,
}

/// TTL cache mapping document URLs to their built indexes.
///
/// Entries are shared out as `Arc<DocumentIndex>`: readers hold a snapshot
/// that stays valid even if the entry is evicted or replaced mid-flight.
pub struct DocumentCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for DocumentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl DocumentCache {
    /// Create a cache from configuration using the system clock.
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a cache with an injected clock (used by tests).
    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            ttl: Duration::from_secs(config.ttl_secs),
            max_entries: config.max_entries.max(1),
            clock,
        }
    }

    /// Look up a live entry. Expired entries are removed and reported as
    /// a miss.
    pub fn get(&mut self, url: &str) -> Option<Arc<DocumentIndex>> {
        let now = self.clock.now();
        match self.entries.get(url) {
            Some(entry) if now.duration_since(entry.inserted_at) < self.ttl => {
                Some(Arc::clone(&entry.index))
            }
            Some(_) => {
                self.entries.remove(url);
                None
            }
            None => None,
        }
    }

    /// Insert or replace the entry for a URL, evicting the oldest entry if
    /// the cache is full.
    pub fn put(&mut self, url: &str, index: Arc<DocumentIndex>) {
        if !self.entries.contains_key(url) && self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                tracing::debug!(url = %key, "Evicting oldest cache entry");
                self.entries.remove(&key);
            }
        }
        self.entries.insert(
            url.to_string(),
            CacheEntry {
                index,
                inserted_at: self.clock.now(),
            },
        );
    }

    /// Remove a single entry.
    pub fn evict(&mut self, url: &str) -> bool {
        self.entries.remove(url).is_some()
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries currently held (including any not yet expired-out).
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
    use std::sync::Mutex;

    /// A clock that only moves when told to.
    struct FakeClock {
        now: Mutex<Instant>,
    }

    impl FakeClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Instant::now()),
            })
        }

        fn advance(&self, d: Duration) {
            *self.now.lock().unwrap() += d;
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    fn empty_index() -> Arc<DocumentIndex> {
        Arc::new(DocumentIndex::empty())
    }

    fn config(ttl_secs: u64, max_entries: usize) -> CacheConfig {
        CacheConfig {
            ttl_secs,
            max_entries,
        }
    }

    #[test]
    fn test_get_miss_then_hit() {
        let mut cache = DocumentCache::new(&config(3600, 10));
        assert!(cache.get("https://example.com/a.pdf").is_none());
        cache.put("https://example.com/a.pdf", empty_index());
        assert!(cache.get("https://example.com/a.pdf").is_some());
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let clock = FakeClock::new();
        let mut cache = DocumentCache::with_clock(&config(3600, 10), clock.clone());
        cache.put("url", empty_index());

        clock.advance(Duration::from_secs(3599));
        assert!(cache.get("url").is_some());

        clock.advance(Duration::from_secs(2));
        assert!(cache.get("url").is_none());
        // The expired entry was dropped, not just hidden.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evict_and_clear() {
        let mut cache = DocumentCache::new(&config(3600, 10));
        cache.put("a", empty_index());
        cache.put("b", empty_index());
        assert!(cache.evict("a"));
        assert!(!cache.evict("a"));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_oldest_entry_evicted_when_full() {
        let clock = FakeClock::new();
        let mut cache = DocumentCache::with_clock(&config(3600, 2), clock.clone());
        cache.put("first", empty_index());
        clock.advance(Duration::from_secs(1));
        cache.put("second", empty_index());
        clock.advance(Duration::from_secs(1));
        cache.put("third", empty_index());

        assert_eq!(cache.len(), 2);
        assert!(cache.get("first").is_none());
        assert!(cache.get("second").is_some());
        assert!(cache.get("third").is_some());
    }

    #[test]
    fn test_put_replaces_existing_without_eviction() {
        let mut cache = DocumentCache::new(&config(3600, 1));
        cache.put("a", empty_index());
        cache.put("a", empty_index());
        assert_eq!(cache.len(), 1);
        assert!(cache.get("a").is_some());
    }
}
