//! Remote cache proxies.
//!
//! [`RemoteCacheOperations`] is the capability every cache handle offers.
//! [`RemoteCache`] implements it over the dispatcher, and
//! [`NearCachedRemoteCache`] decorates any implementation with a local
//! near cache. The versioned helpers in [`VersionedOperations`] build atomic
//! read-modify-write on top of the conditional operations.

mod near_cached;
mod remote_cache;
mod versioned;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hotrod_core::protocol::{Expiration, MetadataValue, VersionedValue};
use hotrod_core::Result;

use crate::listener::{ClientCacheListener, ListenerId};

pub use near_cached::NearCachedRemoteCache;
pub use remote_cache::RemoteCache;
pub use versioned::VersionedOperations;

/// Outcome of a conditional write such as `put_if_absent`, `replace` or
/// `remove`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    /// Whether the server applied the write.
    pub executed: bool,
    /// Previous value, only returned with force-return-value.
    pub previous: Option<Bytes>,
}

/// Status of a version-checked write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionedOperationStatus {
    /// The version matched and the write was applied.
    Success,
    /// The key does not exist.
    NoSuchKey,
    /// The entry changed since the version was read.
    ModifiedKey,
}

/// Result of `replace_with_version` or `remove_with_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedOperationResponse {
    /// Previous value, only returned with force-return-value.
    pub value: Option<Bytes>,
    /// What happened.
    pub status: VersionedOperationStatus,
}

impl VersionedOperationResponse {
    /// Whether the write was applied.
    pub fn is_success(&self) -> bool {
        self.status == VersionedOperationStatus::Success
    }
}

/// Statistics reported by a server for one cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStatistics {
    entries: Vec<(String, String)>,
}

impl ServerStatistics {
    /// Wraps the name/value pairs of a stats response.
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    /// Raw value of a statistic.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// A statistic parsed as an integer.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|v| v.parse().ok())
    }

    /// All statistics in server order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of statistics.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the server reported nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Operations available on a remote cache.
///
/// Keys and values are opaque bytes. Decorators hold the implementation
/// they wrap and forward whatever they do not change.
#[async_trait]
pub trait RemoteCacheOperations: Send + Sync {
    /// Name of the cache.
    fn name(&self) -> &str;

    /// Reads a value.
    async fn get(&self, key: Bytes) -> Result<Option<Bytes>>;

    /// Reads a value with its version stamp.
    async fn get_with_version(&self, key: Bytes) -> Result<Option<VersionedValue>>;

    /// Reads a value with its version and expiration metadata.
    async fn get_with_metadata(&self, key: Bytes) -> Result<Option<MetadataValue>>;

    /// Whether the key exists.
    async fn contains_key(&self, key: Bytes) -> Result<bool>;

    /// Stores a value with explicit expiration.
    ///
    /// Returns the previous value when force-return-value is enabled.
    async fn put_with_expiry(
        &self,
        key: Bytes,
        value: Bytes,
        expiration: Expiration,
    ) -> Result<Option<Bytes>>;

    /// Stores a value unless the key exists, with explicit expiration.
    async fn put_if_absent_with_expiry(
        &self,
        key: Bytes,
        value: Bytes,
        expiration: Expiration,
    ) -> Result<WriteResult>;

    /// Replaces the value of an existing key, with explicit expiration.
    async fn replace_with_expiry(
        &self,
        key: Bytes,
        value: Bytes,
        expiration: Expiration,
    ) -> Result<WriteResult>;

    /// Replaces a value if its version still equals `version`.
    async fn replace_with_version(
        &self,
        key: Bytes,
        value: Bytes,
        version: i64,
    ) -> Result<VersionedOperationResponse>;

    /// Removes a key.
    async fn remove(&self, key: Bytes) -> Result<WriteResult>;

    /// Removes a key if its version still equals `version`.
    async fn remove_with_version(
        &self,
        key: Bytes,
        version: i64,
    ) -> Result<VersionedOperationResponse>;

    /// Removes every entry.
    async fn clear(&self) -> Result<()>;

    /// Number of entries in the cache, cluster wide.
    async fn size(&self) -> Result<u64>;

    /// Server side statistics.
    async fn stats(&self) -> Result<ServerStatistics>;

    /// Round trip to a server of this cache.
    async fn ping(&self) -> Result<()>;

    /// Registers a listener for entry events of this cache.
    async fn add_client_listener(
        &self,
        listener: Arc<dyn ClientCacheListener>,
    ) -> Result<ListenerId>;

    /// Unregisters a listener.
    async fn remove_client_listener(&self, id: ListenerId) -> Result<()>;

    /// Stores a value.
    async fn put(&self, key: Bytes, value: Bytes) -> Result<Option<Bytes>> {
        self.put_with_expiry(key, value, Expiration::NONE).await
    }

    /// Stores a value unless the key exists.
    async fn put_if_absent(&self, key: Bytes, value: Bytes) -> Result<WriteResult> {
        self.put_if_absent_with_expiry(key, value, Expiration::NONE)
            .await
    }

    /// Replaces the value of an existing key.
    async fn replace(&self, key: Bytes, value: Bytes) -> Result<WriteResult> {
        self.replace_with_expiry(key, value, Expiration::NONE).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_statistics_lookup() {
        let stats = ServerStatistics::new(vec![
            ("currentNumberOfEntries".to_string(), "42".to_string()),
            ("timeSinceStart".to_string(), "n/a".to_string()),
        ]);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats.get_i64("currentNumberOfEntries"), Some(42));
        assert_eq!(stats.get("timeSinceStart"), Some("n/a"));
        assert_eq!(stats.get_i64("timeSinceStart"), None);
        assert_eq!(stats.get("missing"), None);
    }

    #[test]
    fn test_versioned_response_success() {
        let ok = VersionedOperationResponse {
            value: None,
            status: VersionedOperationStatus::Success,
        };
        let conflict = VersionedOperationResponse {
            value: None,
            status: VersionedOperationStatus::ModifiedKey,
        };
        assert!(ok.is_success());
        assert!(!conflict.is_success());
    }
}
