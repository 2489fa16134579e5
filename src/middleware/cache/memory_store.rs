use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::error::CacheError;
use crate::middleware::cache::models::CachedResponse;
use crate::middleware::cache::CacheStore;

/// Snapshot of cache statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Total number of cache hits
    pub hits: u64,
    /// Total number of cache misses
    pub misses: u64,
    /// Total number of cache evictions
    pub evictions: u64,
    /// Total number of cache insertions
    pub insertions: u64,
    /// Total number of cache deletions
    pub deletions: u64,
    /// Total number of expired items removed
    pub expirations: u64,
}

impl CacheStats {
    /// Cache hit ratio (hits / (hits + misses))
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    insertions: AtomicU64,
    deletions: AtomicU64,
    expirations: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            deletions: self.deletions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

/// LRU cache entry with access tracking
struct LruCacheEntry {
    /// The cached response
    response: CachedResponse,
    /// Last access time for LRU tracking
    last_accessed: Instant,
}

/// In-memory cache store on a sharded concurrent map with optional LRU bound
pub struct MemoryStore {
    entries: DashMap<String, LruCacheEntry>,
    /// Maximum number of entries in the cache
    max_entries: Option<usize>,
    stats: Counters,
}

impl MemoryStore {
    /// Create an unbounded store
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: None,
            stats: Counters::default(),
        }
    }

    /// Create a store holding at most `max_entries` entries
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries),
            ..Self::new()
        }
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Remove expired entries, returning how many were dropped
    pub fn clean_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.response.is_expired_at(now));
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            Counters::bump(&self.stats.expirations, removed as u64);
            tracing::debug!(removed, "Expired cache entries swept");
        }
        removed
    }

    /// Sweep expired entries every `interval` until the store is dropped
    pub fn spawn_cleanup_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.upgrade() {
                    Some(store) => {
                        store.clean_expired();
                    }
                    None => break,
                }
            }
        })
    }

    /// Evict least recently used entries until there is room for one more
    fn evict_if_needed(&self, new_key: &str) {
        let Some(max_entries) = self.max_entries else {
            return;
        };

        if self.entries.contains_key(new_key) {
            return;
        }

        while self.entries.len() >= max_entries {
            // Prefer dropping something already expired
            if self.clean_expired() > 0 {
                continue;
            }

            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().last_accessed)
                .map(|entry| entry.key().clone());

            match oldest {
                Some(key) => {
                    if self.entries.remove(&key).is_some() {
                        Counters::bump(&self.stats.evictions, 1);
                        tracing::debug!(key = %key, "Evicted least recently used cache entry");
                    }
                }
                None => break,
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        let now = Instant::now();

        let found = match self.entries.get_mut(key) {
            Some(mut entry) if !entry.response.is_expired_at(now) => {
                entry.last_accessed = now;
                Some(entry.response.clone())
            }
            Some(_) => None,
            None => {
                Counters::bump(&self.stats.misses, 1);
                return Ok(None);
            }
        };

        match found {
            Some(response) => {
                Counters::bump(&self.stats.hits, 1);
                Ok(Some(response))
            }
            None => {
                if self
                    .entries
                    .remove_if(key, |_, entry| entry.response.is_expired_at(now))
                    .is_some()
                {
                    Counters::bump(&self.stats.expirations, 1);
                }
                Counters::bump(&self.stats.misses, 1);
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        mut response: CachedResponse,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::StoreError(format!("zero ttl for key {}", key)));
        }

        self.evict_if_needed(key);

        response.expires_at = response.stored_at + ttl;
        self.entries.insert(
            key.to_string(),
            LruCacheEntry {
                response,
                last_accessed: Instant::now(),
            },
        );
        Counters::bump(&self.stats.insertions, 1);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        if self.entries.remove(key).is_some() {
            Counters::bump(&self.stats.deletions, 1);
        }
        Ok(())
    }

    async fn clear_region(&self, region: &str) -> Result<usize, CacheError> {
        let prefix = format!("{}:", region);
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(&prefix));
        let removed = before.saturating_sub(self.entries.len());
        Counters::bump(&self.stats.deletions, removed as u64);
        Ok(removed)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let removed = self.entries.len();
        self.entries.clear();
        Counters::bump(&self.stats.deletions, removed as u64);
        Ok(())
    }

    async fn len(&self) -> usize {
        self.entries.len()
    }
}
