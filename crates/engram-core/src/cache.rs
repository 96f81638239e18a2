//! Best-effort TTL cache.
//!
//! In-process LRU with per-entry expiry and key-prefix invalidation. Keys are
//! namespaced `module:user:...` so a hit can never leak one user's data to
//! another - isolation is enforced by key structure, not by trust in callers'
//! TTL discipline. A miss must never fail a request; this cache has no
//! fallible surface.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde_json::Value;

use crate::config::CACHE_TTL;

/// Minimum capacity of the in-process cache
const DEFAULT_CAPACITY: usize = 10_000;

/// Short stable digest of arbitrary text for embedding in cache keys
pub fn key_digest(text: &str) -> String {
    use std::hash::{DefaultHasher, Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// In-process TTL LRU cache
pub struct MemoryCache {
    inner: Mutex<LruCache<String, CacheEntry>>,
    default_ttl: Duration,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    /// Cache with the default capacity and 300 s TTL
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Cache with a custom capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("clamped to >= 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            default_ttl: CACHE_TTL,
        }
    }

    /// Fetch a live entry; expired entries are dropped on access.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock().ok()?;
        match inner.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                inner.pop(key);
                None
            }
            None => None,
        }
    }

    /// Store with the default TTL.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Store with an explicit TTL.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.put(
                key.into(),
                CacheEntry {
                    value,
                    expires_at: Instant::now() + ttl,
                },
            );
        }
    }

    /// Remove one key.
    pub fn delete(&self, key: &str) -> bool {
        self.inner
            .lock()
            .map(|mut inner| inner.pop(key).is_some())
            .unwrap_or(false)
    }

    /// Remove every key under a prefix; returns the number evicted.
    ///
    /// Writes call this with `module:user:` so a mutation invalidates all of
    /// that user's cached reads in the module.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let Ok(mut inner) = self.inner.lock() else {
            return 0;
        };
        let doomed: Vec<String> = inner
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            inner.pop(key);
        }
        doomed.len()
    }

    /// Number of entries currently held (including not-yet-collected expired ones)
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.len()).unwrap_or(0)
    }

    /// True when the cache holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything.
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.clear();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
