//! Near-cache configuration and implementation for client-side caching.

mod near_cache;

pub use near_cache::{NearCache, NearCacheStats};

use crate::config::ConfigError;

/// Default maximum number of entries kept locally.
const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// How a near cache stays consistent with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NearCacheMode {
    /// No near cache.
    #[default]
    Disabled,
    /// Populate on read and drop on local writes only. Remote writes by other
    /// clients are not seen, so reads may be stale.
    Eager,
    /// Like `Eager`, plus a server listener that invalidates entries written
    /// by anyone.
    Invalidated,
}

impl NearCacheMode {
    /// Whether a near cache is in use at all.
    pub fn enabled(&self) -> bool {
        !matches!(self, NearCacheMode::Disabled)
    }

    /// Whether the cache subscribes to server-pushed invalidations.
    pub fn invalidated(&self) -> bool {
        matches!(self, NearCacheMode::Invalidated)
    }
}

/// Eviction policy for near-cache when max size is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Least Recently Used - evicts entries that haven't been accessed recently.
    #[default]
    Lru,
    /// Least Frequently Used - evicts entries with the lowest access count.
    Lfu,
    /// Random - evicts entries randomly.
    Random,
    /// None - no eviction; new entries are rejected when cache is full.
    None,
}

/// Configuration for a near cache in front of a remote cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NearCacheConfig {
    name: String,
    mode: NearCacheMode,
    max_entries: usize,
    eviction_policy: EvictionPolicy,
}

impl NearCacheConfig {
    /// Creates a new near-cache configuration builder.
    pub fn builder(name: impl Into<String>) -> NearCacheConfigBuilder {
        NearCacheConfigBuilder::new(name)
    }

    /// Returns the name pattern for this near-cache.
    ///
    /// The name can be an exact cache name or a wildcard pattern (e.g., "user-*").
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the consistency mode.
    pub fn mode(&self) -> NearCacheMode {
        self.mode
    }

    /// Returns the maximum number of entries in the near-cache.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Returns the eviction policy used when the cache is full.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        self.eviction_policy
    }

    /// Checks if this configuration matches the given cache name.
    ///
    /// Supports exact matches and simple wildcard patterns with `*` at the end.
    pub fn matches(&self, cache_name: &str) -> bool {
        if let Some(prefix) = self.name.strip_suffix('*') {
            cache_name.starts_with(prefix)
        } else {
            self.name == cache_name
        }
    }
}

/// Builder for `NearCacheConfig`.
#[derive(Debug, Clone)]
pub struct NearCacheConfigBuilder {
    name: String,
    mode: Option<NearCacheMode>,
    max_entries: Option<usize>,
    eviction_policy: Option<EvictionPolicy>,
}

impl NearCacheConfigBuilder {
    /// Creates a new near-cache configuration builder with the given name pattern.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: None,
            max_entries: None,
            eviction_policy: None,
        }
    }

    /// Sets the consistency mode. Defaults to [`NearCacheMode::Invalidated`].
    pub fn mode(mut self, mode: NearCacheMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Sets the maximum number of entries in the near-cache.
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Sets the eviction policy.
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = Some(policy);
        self
    }

    /// Builds the near-cache configuration.
    pub fn build(self) -> Result<NearCacheConfig, ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::new("near-cache name must not be empty"));
        }

        let max_entries = self.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES);
        if max_entries == 0 {
            return Err(ConfigError::new("near-cache max_entries must be positive"));
        }

        Ok(NearCacheConfig {
            name: self.name,
            mode: self.mode.unwrap_or(NearCacheMode::Invalidated),
            max_entries,
            eviction_policy: self.eviction_policy.unwrap_or_default(),
        })
    }
}
