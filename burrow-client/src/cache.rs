//! DNS response caching with TTL expiration
//!
//! Stores the exact encoded response bytes received through the tunnel,
//! keyed by the first question name as it appeared on the wire. Entries
//! expire after a fixed TTL; the caller rewrites the transaction id when
//! reusing an entry.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::RwLock;

/// Fallback capacity when the configured size is zero
const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Cached DNS response
#[derive(Debug, Clone)]
struct CacheEntry {
    /// Encoded DNS response bytes
    response: Vec<u8>,
    /// When this entry expires
    expires_at: Instant,
}

impl CacheEntry {
    fn new(response: Vec<u8>, ttl: Duration) -> Self {
        Self {
            response,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of expired entries removed
    pub expired: u64,
    /// Current number of entries
    pub entries: usize,
}

struct CacheInner {
    entries: LruCache<String, CacheEntry>,
    stats: CacheStats,
}

/// Bounded TTL cache of encoded DNS responses
///
/// Capacity eviction is handled by the LRU store; expired entries are
/// removed lazily on lookup and in bulk by [`ResponseCache::sweep`].
pub struct ResponseCache {
    inner: RwLock<CacheInner>,
    ttl: Duration,
}

impl ResponseCache {
    /// Create a cache holding at most `max_size` entries
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size)
            .unwrap_or_else(|| NonZeroUsize::new(DEFAULT_MAX_ENTRIES).expect("non-zero"));

        Self {
            inner: RwLock::new(CacheInner {
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
            ttl,
        }
    }

    /// Look up a response by question name
    ///
    /// Returns `None` on miss or when the entry has expired.
    pub async fn lookup(&self, name: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.write().await;

        let cached = inner
            .entries
            .get(name)
            .map(|entry| (entry.response.clone(), entry.is_expired()));

        match cached {
            Some((_, true)) => {
                inner.entries.pop(name);
                inner.stats.expired += 1;
                inner.stats.misses += 1;
                None
            }
            Some((response, false)) => {
                inner.stats.hits += 1;
                Some(response)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Insert a response under the given question name
    ///
    /// Called only for successful-status responses. At capacity the LRU
    /// store evicts one entry to make room.
    pub async fn insert(&self, name: String, response: Vec<u8>) {
        let entry = CacheEntry::new(response, self.ttl);

        let mut inner = self.inner.write().await;
        inner.entries.put(name, entry);
        inner.stats.entries = inner.entries.len();
    }

    /// Remove all expired entries, returning how many were dropped
    pub async fn sweep(&self) -> usize {
        let mut inner = self.inner.write().await;

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(name, _)| name.clone())
            .collect();

        for name in &expired {
            inner.entries.pop(name);
        }

        inner.stats.expired += expired.len() as u64;
        inner.stats.entries = inner.entries.len();
        expired.len()
    }

    /// Current number of entries
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Whether the cache is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    /// Snapshot of the cache statistics
    pub async fn stats(&self) -> CacheStats {
        self.inner.read().await.stats.clone()
    }
}
