//! Near cache decorator.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hotrod_core::protocol::{CacheEvent, Expiration, MetadataValue, VersionedValue};
use hotrod_core::Result;

use super::{
    RemoteCacheOperations, ServerStatistics, VersionedOperationResponse, WriteResult,
};
use crate::cache::NearCache;
use crate::listener::{ClientCacheListener, ListenerId};

/// Drops near cache entries when the server reports them changed.
struct InvalidationListener {
    near_cache: Arc<NearCache>,
}

impl InvalidationListener {
    fn invalidate(&self, event: &CacheEvent) {
        if self.near_cache.invalidate(&event.key) {
            tracing::trace!(
                near_cache = %self.near_cache.config().name(),
                "entry invalidated by server event"
            );
        }
    }
}

impl ClientCacheListener for InvalidationListener {
    fn on_created(&self, event: &CacheEvent) {
        self.invalidate(event);
    }

    fn on_modified(&self, event: &CacheEvent) {
        self.invalidate(event);
    }

    fn on_removed(&self, event: &CacheEvent) {
        self.invalidate(event);
    }

    fn on_expired(&self, event: &CacheEvent) {
        self.invalidate(event);
    }

    fn on_failover(&self) {
        tracing::debug!(
            near_cache = %self.near_cache.config().name(),
            "listener failing over, clearing near cache"
        );
        self.near_cache.clear();
    }
}

/// A cache with a client side copy of recently read entries.
///
/// Reads are served locally when possible. Local writes invalidate the
/// key, so a caller never reads a value older than its own last write. In
/// invalidated mode a server listener also drops keys written by other
/// clients; in eager mode those writes only become visible once the local
/// entry is evicted or expires.
///
/// When the listener's connection closes the near cache is emptied and
/// the listener registered again on another server, since invalidations
/// sent meanwhile are lost.
///
/// `put`, `put_if_absent` and the versioned writes invalidate once the
/// server acknowledged them. `replace` and `remove` invalidate before the
/// request is sent. With force-return-value, acknowledged writes only
/// invalidate when the server returned a previous value, since a key
/// without one was never cached.
pub struct NearCachedRemoteCache<C> {
    inner: C,
    near_cache: Arc<NearCache>,
    force_return_value: bool,
    listener: Option<ListenerId>,
}

impl<C> std::fmt::Debug for NearCachedRemoteCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NearCachedRemoteCache")
            .field("near_cache", &self.near_cache)
            .field("force_return_value", &self.force_return_value)
            .field("listener", &self.listener)
            .finish_non_exhaustive()
    }
}

impl<C: RemoteCacheOperations> NearCachedRemoteCache<C> {
    /// Wraps `inner`, registering the invalidation listener when the near
    /// cache runs in invalidated mode.
    pub async fn start(
        inner: C,
        near_cache: Arc<NearCache>,
        force_return_value: bool,
    ) -> Result<Self> {
        let listener = if near_cache.config().mode().invalidated() {
            let listener = InvalidationListener {
                near_cache: Arc::clone(&near_cache),
            };
            Some(inner.add_client_listener(Arc::new(listener)).await?)
        } else {
            None
        };
        tracing::debug!(
            cache = %inner.name(),
            mode = ?near_cache.config().mode(),
            "near cache started"
        );
        Ok(Self {
            inner,
            near_cache,
            force_return_value,
            listener,
        })
    }

    /// The local cache.
    pub fn near_cache(&self) -> &Arc<NearCache> {
        &self.near_cache
    }

    /// The wrapped cache.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Id of the invalidation listener, in invalidated mode.
    pub fn listener_id(&self) -> Option<ListenerId> {
        self.listener
    }

    /// Unregisters the invalidation listener and empties the local cache.
    pub async fn stop(&self) -> Result<()> {
        self.near_cache.clear();
        if let Some(id) = self.listener {
            self.inner.remove_client_listener(id).await?;
        }
        Ok(())
    }

    fn invalidate_acknowledged(&self, key: &[u8], previous: Option<&Bytes>) {
        if !self.force_return_value || previous.is_some() {
            self.near_cache.invalidate(key);
        }
    }
}

#[async_trait]
impl<C: RemoteCacheOperations> RemoteCacheOperations for NearCachedRemoteCache<C> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, key: Bytes) -> Result<Option<Bytes>> {
        if let Some(entry) = self.near_cache.get(&key) {
            return Ok(Some(entry.value));
        }
        match self.inner.get_with_metadata(key.clone()).await? {
            Some(entry) => {
                let value = entry.value.clone();
                self.near_cache.put_if_absent(key, entry);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn get_with_version(&self, key: Bytes) -> Result<Option<VersionedValue>> {
        self.inner.get_with_version(key).await
    }

    async fn get_with_metadata(&self, key: Bytes) -> Result<Option<MetadataValue>> {
        self.inner.get_with_metadata(key).await
    }

    async fn contains_key(&self, key: Bytes) -> Result<bool> {
        if self.near_cache.contains_key(&key) {
            return Ok(true);
        }
        self.inner.contains_key(key).await
    }

    async fn put_with_expiry(
        &self,
        key: Bytes,
        value: Bytes,
        expiration: Expiration,
    ) -> Result<Option<Bytes>> {
        let previous = self
            .inner
            .put_with_expiry(key.clone(), value, expiration)
            .await?;
        self.invalidate_acknowledged(&key, previous.as_ref());
        Ok(previous)
    }

    async fn put_if_absent_with_expiry(
        &self,
        key: Bytes,
        value: Bytes,
        expiration: Expiration,
    ) -> Result<WriteResult> {
        let result = self
            .inner
            .put_if_absent_with_expiry(key.clone(), value, expiration)
            .await?;
        self.invalidate_acknowledged(&key, result.previous.as_ref());
        Ok(result)
    }

    async fn replace_with_expiry(
        &self,
        key: Bytes,
        value: Bytes,
        expiration: Expiration,
    ) -> Result<WriteResult> {
        self.near_cache.invalidate(&key);
        self.inner.replace_with_expiry(key, value, expiration).await
    }

    async fn replace_with_version(
        &self,
        key: Bytes,
        value: Bytes,
        version: i64,
    ) -> Result<VersionedOperationResponse> {
        let response = self
            .inner
            .replace_with_version(key.clone(), value, version)
            .await?;
        self.invalidate_acknowledged(&key, response.value.as_ref());
        Ok(response)
    }

    async fn remove(&self, key: Bytes) -> Result<WriteResult> {
        self.near_cache.invalidate(&key);
        self.inner.remove(key).await
    }

    async fn remove_with_version(
        &self,
        key: Bytes,
        version: i64,
    ) -> Result<VersionedOperationResponse> {
        let response = self
            .inner
            .remove_with_version(key.clone(), version)
            .await?;
        self.invalidate_acknowledged(&key, response.value.as_ref());
        Ok(response)
    }

    async fn clear(&self) -> Result<()> {
        let result = self.inner.clear().await;
        self.near_cache.clear();
        result
    }

    async fn size(&self) -> Result<u64> {
        self.inner.size().await
    }

    async fn stats(&self) -> Result<ServerStatistics> {
        self.inner.stats().await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn add_client_listener(
        &self,
        listener: Arc<dyn ClientCacheListener>,
    ) -> Result<ListenerId> {
        self.inner.add_client_listener(listener).await
    }

    async fn remove_client_listener(&self, id: ListenerId) -> Result<()> {
        self.inner.remove_client_listener(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{NearCacheConfig, NearCacheMode};
    use crate::proxy::VersionedOperationStatus;
    use dashmap::DashMap;
    use hotrod_core::protocol::CacheEventKind;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory stand in for a remote cache, counting remote reads.
    #[derive(Default)]
    struct LocalCache {
        entries: DashMap<Bytes, (Bytes, i64)>,
        versions: AtomicI64,
        remote_reads: AtomicUsize,
        listeners: Mutex<Vec<Arc<dyn ClientCacheListener>>>,
        force_return_value: bool,
    }

    impl LocalCache {
        fn forcing() -> Self {
            Self {
                force_return_value: true,
                ..Self::default()
            }
        }

        fn next_version(&self) -> i64 {
            self.versions.fetch_add(1, Ordering::Relaxed) + 1
        }

        fn previous(&self, old: Option<(Bytes, i64)>) -> Option<Bytes> {
            if self.force_return_value {
                old.map(|(v, _)| v)
            } else {
                None
            }
        }

        fn push(&self, kind: CacheEventKind, key: &Bytes) {
            let event = CacheEvent {
                listener_id: Bytes::new(),
                kind,
                key: key.clone(),
                version: None,
                is_retried: false,
                custom_data: None,
            };
            for listener in self.listeners.lock().unwrap().iter() {
                listener.on_modified(&event);
            }
        }
    }

    #[async_trait]
    impl RemoteCacheOperations for LocalCache {
        fn name(&self) -> &str {
            "local"
        }

        async fn get(&self, key: Bytes) -> Result<Option<Bytes>> {
            self.remote_reads.fetch_add(1, Ordering::Relaxed);
            Ok(self.entries.get(&key).map(|e| e.0.clone()))
        }

        async fn get_with_version(&self, key: Bytes) -> Result<Option<VersionedValue>> {
            self.remote_reads.fetch_add(1, Ordering::Relaxed);
            Ok(self.entries.get(&key).map(|e| VersionedValue {
                value: e.0.clone(),
                version: e.1,
            }))
        }

        async fn get_with_metadata(&self, key: Bytes) -> Result<Option<MetadataValue>> {
            self.remote_reads.fetch_add(1, Ordering::Relaxed);
            Ok(self.entries.get(&key).map(|e| MetadataValue {
                value: e.0.clone(),
                version: e.1,
                created: -1,
                lifespan: -1,
                last_used: -1,
                max_idle: -1,
            }))
        }

        async fn contains_key(&self, key: Bytes) -> Result<bool> {
            self.remote_reads.fetch_add(1, Ordering::Relaxed);
            Ok(self.entries.contains_key(&key))
        }

        async fn put_with_expiry(
            &self,
            key: Bytes,
            value: Bytes,
            _expiration: Expiration,
        ) -> Result<Option<Bytes>> {
            let old = self.entries.insert(key, (value, self.next_version()));
            Ok(self.previous(old))
        }

        async fn put_if_absent_with_expiry(
            &self,
            key: Bytes,
            value: Bytes,
            _expiration: Expiration,
        ) -> Result<WriteResult> {
            let version = self.next_version();
            let mut executed = false;
            let current = self
                .entries
                .entry(key)
                .or_insert_with(|| {
                    executed = true;
                    (value, version)
                })
                .clone();
            Ok(WriteResult {
                executed,
                previous: if executed { None } else { self.previous(Some(current)) },
            })
        }

        async fn replace_with_expiry(
            &self,
            key: Bytes,
            value: Bytes,
            _expiration: Expiration,
        ) -> Result<WriteResult> {
            let version = self.next_version();
            match self.entries.get_mut(&key) {
                Some(mut entry) => {
                    let old = std::mem::replace(&mut *entry, (value, version));
                    Ok(WriteResult {
                        executed: true,
                        previous: self.previous(Some(old)),
                    })
                }
                None => Ok(WriteResult {
                    executed: false,
                    previous: None,
                }),
            }
        }

        async fn replace_with_version(
            &self,
            key: Bytes,
            value: Bytes,
            version: i64,
        ) -> Result<VersionedOperationResponse> {
            let next = self.next_version();
            let status = match self.entries.get_mut(&key) {
                Some(mut entry) if entry.1 == version => {
                    *entry = (value, next);
                    VersionedOperationStatus::Success
                }
                Some(_) => VersionedOperationStatus::ModifiedKey,
                None => VersionedOperationStatus::NoSuchKey,
            };
            Ok(VersionedOperationResponse {
                value: None,
                status,
            })
        }

        async fn remove(&self, key: Bytes) -> Result<WriteResult> {
            let old = self.entries.remove(&key).map(|(_, v)| v);
            Ok(WriteResult {
                executed: old.is_some(),
                previous: self.previous(old),
            })
        }

        async fn remove_with_version(
            &self,
            key: Bytes,
            version: i64,
        ) -> Result<VersionedOperationResponse> {
            let status = match self.entries.remove_if(&key, |_, e| e.1 == version) {
                Some(_) => VersionedOperationStatus::Success,
                None if self.entries.contains_key(&key) => VersionedOperationStatus::ModifiedKey,
                None => VersionedOperationStatus::NoSuchKey,
            };
            Ok(VersionedOperationResponse {
                value: None,
                status,
            })
        }

        async fn clear(&self) -> Result<()> {
            self.entries.clear();
            Ok(())
        }

        async fn size(&self) -> Result<u64> {
            Ok(self.entries.len() as u64)
        }

        async fn stats(&self) -> Result<ServerStatistics> {
            Ok(ServerStatistics::default())
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn add_client_listener(
            &self,
            listener: Arc<dyn ClientCacheListener>,
        ) -> Result<ListenerId> {
            self.listeners.lock().unwrap().push(listener);
            Ok(ListenerId::new())
        }

        async fn remove_client_listener(&self, _id: ListenerId) -> Result<()> {
            self.listeners.lock().unwrap().clear();
            Ok(())
        }
    }

    fn near_cache(mode: NearCacheMode) -> Arc<NearCache> {
        Arc::new(NearCache::new(
            NearCacheConfig::builder("local")
                .mode(mode)
                .max_entries(16)
                .build()
                .unwrap(),
        ))
    }

    fn key(k: &'static str) -> Bytes {
        Bytes::from_static(k.as_bytes())
    }

    #[tokio::test]
    async fn test_miss_then_fill() {
        let cache = NearCachedRemoteCache::start(
            LocalCache::default(),
            near_cache(NearCacheMode::Invalidated),
            false,
        )
        .await
        .unwrap();
        cache.inner().entries.insert(key("k"), (key("v"), 1));

        assert_eq!(cache.get(key("k")).await.unwrap(), Some(key("v")));
        assert_eq!(cache.inner().remote_reads.load(Ordering::Relaxed), 1);
        assert_eq!(cache.get(key("k")).await.unwrap(), Some(key("v")));
        assert_eq!(cache.inner().remote_reads.load(Ordering::Relaxed), 1);

        let stats = cache.near_cache().stats();
        assert_eq!(stats.hits(), 1);
        assert_eq!(stats.misses(), 1);
    }

    #[tokio::test]
    async fn test_missing_key_not_cached() {
        let cache = NearCachedRemoteCache::start(
            LocalCache::default(),
            near_cache(NearCacheMode::Eager),
            false,
        )
        .await
        .unwrap();
        assert_eq!(cache.get(key("absent")).await.unwrap(), None);
        assert!(cache.near_cache().is_empty());
    }

    #[tokio::test]
    async fn test_own_writes_never_read_stale() {
        let cache = NearCachedRemoteCache::start(
            LocalCache::default(),
            near_cache(NearCacheMode::Eager),
            false,
        )
        .await
        .unwrap();

        cache.put(key("k"), key("v1")).await.unwrap();
        assert_eq!(cache.get(key("k")).await.unwrap(), Some(key("v1")));
        cache.put(key("k"), key("v2")).await.unwrap();
        assert_eq!(cache.get(key("k")).await.unwrap(), Some(key("v2")));

        cache.replace(key("k"), key("v3")).await.unwrap();
        assert_eq!(cache.get(key("k")).await.unwrap(), Some(key("v3")));

        cache.remove(key("k")).await.unwrap();
        assert_eq!(cache.get(key("k")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_force_return_skips_invalidation_of_new_keys() {
        let cache = NearCachedRemoteCache::start(
            LocalCache::forcing(),
            near_cache(NearCacheMode::Eager),
            true,
        )
        .await
        .unwrap();

        assert_eq!(cache.put(key("fresh"), key("v")).await.unwrap(), None);
        assert_eq!(cache.near_cache().stats().invalidations(), 0);

        cache.get(key("fresh")).await.unwrap();
        assert_eq!(
            cache.put(key("fresh"), key("v2")).await.unwrap(),
            Some(key("v"))
        );
        assert_eq!(cache.near_cache().stats().invalidations(), 1);
        assert_eq!(cache.get(key("fresh")).await.unwrap(), Some(key("v2")));
    }

    #[tokio::test]
    async fn test_versioned_write_invalidates() {
        let cache = NearCachedRemoteCache::start(
            LocalCache::default(),
            near_cache(NearCacheMode::Eager),
            false,
        )
        .await
        .unwrap();
        cache.put(key("k"), key("v1")).await.unwrap();
        cache.get(key("k")).await.unwrap();
        let version = cache.get_with_version(key("k")).await.unwrap().unwrap().version;

        let response = cache
            .replace_with_version(key("k"), key("v2"), version)
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(cache.get(key("k")).await.unwrap(), Some(key("v2")));
    }

    #[tokio::test]
    async fn test_server_event_invalidates_in_invalidated_mode() {
        let cache = NearCachedRemoteCache::start(
            LocalCache::default(),
            near_cache(NearCacheMode::Invalidated),
            false,
        )
        .await
        .unwrap();
        assert!(cache.listener_id().is_some());

        cache.inner().entries.insert(key("k"), (key("v1"), 1));
        cache.get(key("k")).await.unwrap();
        assert_eq!(cache.near_cache().len(), 1);

        // Another client writes through the server.
        cache.inner().entries.insert(key("k"), (key("v2"), 2));
        cache.inner().push(CacheEventKind::Modified, &key("k"));
        assert!(cache.near_cache().is_empty());
        assert_eq!(cache.get(key("k")).await.unwrap(), Some(key("v2")));
    }

    #[tokio::test]
    async fn test_listener_failover_clears_near_cache() {
        let cache = NearCachedRemoteCache::start(
            LocalCache::default(),
            near_cache(NearCacheMode::Invalidated),
            false,
        )
        .await
        .unwrap();
        cache.inner().entries.insert(key("k"), (key("v1"), 1));
        cache.get(key("k")).await.unwrap();
        assert_eq!(cache.near_cache().len(), 1);

        let listeners = cache.inner().listeners.lock().unwrap().clone();
        for listener in listeners {
            listener.on_failover();
        }
        assert!(cache.near_cache().is_empty());
    }

    #[tokio::test]
    async fn test_eager_mode_registers_no_listener() {
        let cache = NearCachedRemoteCache::start(
            LocalCache::default(),
            near_cache(NearCacheMode::Eager),
            false,
        )
        .await
        .unwrap();
        assert!(cache.listener_id().is_none());
        assert!(cache.inner().listeners.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_clears_and_unregisters() {
        let cache = NearCachedRemoteCache::start(
            LocalCache::default(),
            near_cache(NearCacheMode::Invalidated),
            false,
        )
        .await
        .unwrap();
        cache.put(key("k"), key("v")).await.unwrap();
        cache.get(key("k")).await.unwrap();

        cache.stop().await.unwrap();
        assert!(cache.near_cache().is_empty());
        assert!(cache.inner().listeners.lock().unwrap().is_empty());
    }
}
