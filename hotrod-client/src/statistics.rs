//! Client statistics collection and reporting.
//!
//! The dispatcher is the only writer of the remote counters; near caches
//! write the near-cache counters. Everything is a relaxed atomic, readers
//! take a [`StatisticsSnapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hotrod_core::protocol::constants::*;

/// Category an operation is counted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// A read that found the key.
    Hit,
    /// A read that did not find the key.
    Miss,
    /// A write.
    Store,
    /// A removal.
    Remove,
    /// Anything else: pings, stats, clear, listener management.
    Other,
}

impl OperationType {
    /// Classifies a response by request opcode and status.
    pub fn classify(request_opcode: u8, status: u8) -> Self {
        match request_opcode {
            GET_REQUEST | GET_WITH_VERSION_REQUEST | GET_WITH_METADATA_REQUEST
            | CONTAINS_KEY_REQUEST => {
                if status == KEY_DOES_NOT_EXIST_STATUS {
                    OperationType::Miss
                } else {
                    OperationType::Hit
                }
            }
            PUT_REQUEST | PUT_IF_ABSENT_REQUEST | REPLACE_REQUEST
            | REPLACE_IF_UNMODIFIED_REQUEST => OperationType::Store,
            REMOVE_REQUEST | REMOVE_IF_UNMODIFIED_REQUEST => OperationType::Remove,
            _ => OperationType::Other,
        }
    }

    /// Returns the name of this operation type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Store => "store",
            Self::Remove => "remove",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Default)]
struct TimedCounter {
    count: AtomicU64,
    nanos: AtomicU64,
}

impl TimedCounter {
    fn record(&self, elapsed: Duration) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.nanos
            .fetch_add(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::Relaxed);
    }

    fn load(&self) -> (u64, u64) {
        (
            self.count.load(Ordering::Relaxed),
            self.nanos.load(Ordering::Relaxed),
        )
    }

    fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.nanos.store(0, Ordering::Relaxed);
    }
}

/// Live counters shared by one client instance.
#[derive(Debug, Default)]
pub struct ClientStatistics {
    hits: TimedCounter,
    misses: TimedCounter,
    stores: TimedCounter,
    removes: TimedCounter,
    near_cache_hits: AtomicU64,
    near_cache_misses: AtomicU64,
    near_cache_invalidations: AtomicU64,
    retries: AtomicU64,
    topology_updates: AtomicU64,
}

impl ClientStatistics {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed remote operation.
    pub fn record_operation(&self, op: OperationType, elapsed: Duration) {
        match op {
            OperationType::Hit => self.hits.record(elapsed),
            OperationType::Miss => self.misses.record(elapsed),
            OperationType::Store => self.stores.record(elapsed),
            OperationType::Remove => self.removes.record(elapsed),
            OperationType::Other => {}
        }
    }

    /// Records a near-cache hit.
    pub fn record_near_cache_hit(&self) {
        self.near_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a near-cache miss.
    pub fn record_near_cache_miss(&self) {
        self.near_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a near-cache invalidation.
    pub fn record_near_cache_invalidation(&self) {
        self.near_cache_invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a retried attempt.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an applied topology update.
    pub fn record_topology_update(&self) {
        self.topology_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a consistent-enough snapshot of every counter.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let (hits, hit_nanos) = self.hits.load();
        let (misses, miss_nanos) = self.misses.load();
        let (stores, store_nanos) = self.stores.load();
        let (removes, remove_nanos) = self.removes.load();
        StatisticsSnapshot {
            remote_hits: hits,
            remote_misses: misses,
            remote_stores: stores,
            remote_removes: removes,
            hit_nanos,
            miss_nanos,
            store_nanos,
            remove_nanos,
            near_cache_hits: self.near_cache_hits.load(Ordering::Relaxed),
            near_cache_misses: self.near_cache_misses.load(Ordering::Relaxed),
            near_cache_invalidations: self.near_cache_invalidations.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            topology_updates: self.topology_updates.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        self.hits.reset();
        self.misses.reset();
        self.stores.reset();
        self.removes.reset();
        self.near_cache_hits.store(0, Ordering::Relaxed);
        self.near_cache_misses.store(0, Ordering::Relaxed);
        self.near_cache_invalidations.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.topology_updates.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`ClientStatistics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    remote_hits: u64,
    remote_misses: u64,
    remote_stores: u64,
    remote_removes: u64,
    hit_nanos: u64,
    miss_nanos: u64,
    store_nanos: u64,
    remove_nanos: u64,
    near_cache_hits: u64,
    near_cache_misses: u64,
    near_cache_invalidations: u64,
    retries: u64,
    topology_updates: u64,
}

fn average(total_nanos: u64, count: u64) -> Duration {
    if count == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(total_nanos / count)
    }
}

impl StatisticsSnapshot {
    /// Remote reads that found the key.
    pub fn remote_hits(&self) -> u64 {
        self.remote_hits
    }

    /// Remote reads that missed.
    pub fn remote_misses(&self) -> u64 {
        self.remote_misses
    }

    /// Remote writes.
    pub fn remote_stores(&self) -> u64 {
        self.remote_stores
    }

    /// Remote removals.
    pub fn remote_removes(&self) -> u64 {
        self.remote_removes
    }

    /// Average time of a remote hit.
    pub fn average_remote_read_time(&self) -> Duration {
        average(self.hit_nanos, self.remote_hits)
    }

    /// Average time of a remote miss.
    pub fn average_remote_miss_time(&self) -> Duration {
        average(self.miss_nanos, self.remote_misses)
    }

    /// Average time of a remote write.
    pub fn average_remote_store_time(&self) -> Duration {
        average(self.store_nanos, self.remote_stores)
    }

    /// Average time of a remote removal.
    pub fn average_remote_remove_time(&self) -> Duration {
        average(self.remove_nanos, self.remote_removes)
    }

    /// Near-cache hits.
    pub fn near_cache_hits(&self) -> u64 {
        self.near_cache_hits
    }

    /// Near-cache misses.
    pub fn near_cache_misses(&self) -> u64 {
        self.near_cache_misses
    }

    /// Near-cache invalidations.
    pub fn near_cache_invalidations(&self) -> u64 {
        self.near_cache_invalidations
    }

    /// Attempts that were retried on another server.
    pub fn retries(&self) -> u64 {
        self.retries
    }

    /// Topology frames applied.
    pub fn topology_updates(&self) -> u64 {
        self.topology_updates
    }

    /// Near-cache hit ratio, `0.0` when there were no lookups.
    pub fn near_cache_hit_ratio(&self) -> f64 {
        let total = self.near_cache_hits + self.near_cache_misses;
        if total == 0 {
            0.0
        } else {
            self.near_cache_hits as f64 / total as f64
        }
    }
}
