//! Near-cache implementation for client-side caching.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hotrod_core::protocol::MetadataValue;
use rand::Rng;

use super::{EvictionPolicy, NearCacheConfig};
use crate::statistics::ClientStatistics;

/// Statistics for near-cache operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NearCacheStats {
    hits: u64,
    misses: u64,
    invalidations: u64,
    evictions: u64,
    expirations: u64,
    entries: u64,
}

impl NearCacheStats {
    /// Returns the number of cache hits.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Returns the number of cache misses.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Returns the number of entries dropped by invalidation.
    pub fn invalidations(&self) -> u64 {
        self.invalidations
    }

    /// Returns the number of entries evicted due to capacity.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Returns the number of entries dropped because their lifespan ended.
    pub fn expirations(&self) -> u64 {
        self.expirations
    }

    /// Returns the number of entries currently held.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Returns the hit ratio (hits / total lookups).
    ///
    /// Returns `0.0` if no lookups have been performed.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Internal cache entry with metadata for expiration and eviction tracking.
#[derive(Debug)]
struct CacheEntry {
    metadata: MetadataValue,
    expires_at: Option<Instant>,
    last_accessed: Instant,
    access_count: u64,
}

impl CacheEntry {
    fn new(metadata: MetadataValue, now: Instant) -> Self {
        let expires_at = expiry_of(&metadata, now);
        Self {
            metadata,
            expires_at,
            last_accessed: now,
            access_count: 1,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }

    fn touch(&mut self, now: Instant) {
        self.last_accessed = now;
        self.access_count += 1;
    }
}

/// Translates the server's creation time and lifespan into a local deadline.
fn expiry_of(metadata: &MetadataValue, now: Instant) -> Option<Instant> {
    if metadata.lifespan <= 0 || metadata.created < 0 {
        return None;
    }
    let deadline_ms = metadata
        .created
        .saturating_add(i64::from(metadata.lifespan) * 1000);
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    let remaining = deadline_ms.saturating_sub(now_ms).max(0) as u64;
    Some(now + Duration::from_millis(remaining))
}

/// A client-side mirror of remote entries.
///
/// Entries are only ever inserted with [`put_if_absent`](Self::put_if_absent)
/// after a remote read and only ever leave by invalidation, expiry, eviction
/// or clear. An entry is never overwritten in place, so a value fetched
/// before a concurrent invalidation cannot resurrect a stale copy.
///
/// Lifespans reported by the server are honored. Max idle is not: there is
/// no local idle clock, and entries carrying one are stored with a warning.
pub struct NearCache {
    config: NearCacheConfig,
    store: DashMap<Bytes, CacheEntry>,
    counters: Counters,
    statistics: Option<Arc<ClientStatistics>>,
}

impl std::fmt::Debug for NearCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NearCache")
            .field("config", &self.config)
            .field("store_size", &self.store.len())
            .finish()
    }
}

impl NearCache {
    /// Creates a new near-cache with the given configuration.
    pub fn new(config: NearCacheConfig) -> Self {
        Self {
            config,
            store: DashMap::new(),
            counters: Counters::default(),
            statistics: None,
        }
    }

    /// Creates a near cache that also reports into client-wide statistics.
    pub fn with_statistics(config: NearCacheConfig, statistics: Arc<ClientStatistics>) -> Self {
        Self {
            statistics: Some(statistics),
            ..Self::new(config)
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &NearCacheConfig {
        &self.config
    }

    /// Looks up a key, counting a hit or a miss.
    pub fn get(&self, key: &[u8]) -> Option<MetadataValue> {
        let now = Instant::now();
        let mut expired = false;
        let found = match self.store.get_mut(key) {
            Some(mut entry) => {
                if entry.is_expired(now) {
                    expired = true;
                    None
                } else {
                    entry.touch(now);
                    Some(entry.metadata.clone())
                }
            }
            None => None,
        };

        if expired {
            self.store.remove_if(key, |_, e| e.is_expired(now));
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
        }

        match found {
            Some(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                if let Some(stats) = &self.statistics {
                    stats.record_near_cache_hit();
                }
                Some(value)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                if let Some(stats) = &self.statistics {
                    stats.record_near_cache_miss();
                }
                None
            }
        }
    }

    /// Stores a freshly fetched entry unless one is already present.
    ///
    /// Returns `false` when the key was present or the cache is full and
    /// configured not to evict.
    pub fn put_if_absent(&self, key: Bytes, metadata: MetadataValue) -> bool {
        if metadata.max_idle >= 0 {
            tracing::warn!(
                near_cache = %self.config.name(),
                max_idle = metadata.max_idle,
                "max idle expiration is not supported by the near cache, entry kept until invalidated"
            );
        }

        if !self.store.contains_key(&key)
            && self.store.len() >= self.config.max_entries()
            && !self.evict_one()
        {
            return false;
        }

        let now = Instant::now();
        match self.store.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::new(metadata, now));
                true
            }
        }
    }

    /// Drops a key, counting an invalidation when it was present.
    pub fn invalidate(&self, key: &[u8]) -> bool {
        let removed = self.store.remove(key).is_some();
        if removed {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
            if let Some(stats) = &self.statistics {
                stats.record_near_cache_invalidation();
            }
        }
        removed
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Whether a live entry exists, without touching statistics.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        let now = Instant::now();
        self.store
            .get(key)
            .map(|e| !e.is_expired(now))
            .unwrap_or(false)
    }

    /// Returns the number of entries held.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns whether the near cache holds no entry.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Returns a statistics snapshot.
    pub fn stats(&self) -> NearCacheStats {
        NearCacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            entries: self.store.len() as u64,
        }
    }

    fn evict_one(&self) -> bool {
        let victim = match self.config.eviction_policy() {
            EvictionPolicy::Lru => self
                .store
                .iter()
                .min_by_key(|e| e.value().last_accessed)
                .map(|e| e.key().clone()),
            EvictionPolicy::Lfu => self
                .store
                .iter()
                .min_by_key(|e| e.value().access_count)
                .map(|e| e.key().clone()),
            EvictionPolicy::Random => {
                let len = self.store.len();
                if len == 0 {
                    None
                } else {
                    let index = rand::thread_rng().gen_range(0..len);
                    self.store.iter().nth(index).map(|e| e.key().clone())
                }
            }
            EvictionPolicy::None => None,
        };

        match victim {
            Some(key) => {
                if self.store.remove(&key).is_some() {
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                }
                true
            }
            None => false,
        }
    }
}
