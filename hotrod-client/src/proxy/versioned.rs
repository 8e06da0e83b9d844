//! Atomic read-modify-write over version stamps.
//!
//! Each helper reads the entry with its version, asks the caller for the
//! new value, then applies it with a conditional write that only succeeds
//! if nobody changed the entry in between. On conflict the whole cycle
//! runs again from a fresh read, without backoff. Contention on one key
//! can therefore keep a call looping; wrap it in a timeout if latency
//! matters.

use async_trait::async_trait;
use bytes::Bytes;
use hotrod_core::Result;

use super::{RemoteCacheOperations, VersionedOperationStatus};

enum Step {
    Done(Option<Bytes>),
    Retry,
}

/// Compare-and-swap helpers, available on every [`RemoteCacheOperations`].
#[async_trait]
pub trait VersionedOperations: RemoteCacheOperations {
    /// Sets the entry to `remapping(key, current)`, removing it when that
    /// returns `None`. Returns the value left in the cache.
    async fn compute<F>(&self, key: Bytes, remapping: F) -> Result<Option<Bytes>>
    where
        F: Fn(&Bytes, Option<&Bytes>) -> Option<Bytes> + Send + Sync;

    /// Like [`compute`](Self::compute) but only for a present entry.
    async fn compute_if_present<F>(&self, key: Bytes, remapping: F) -> Result<Option<Bytes>>
    where
        F: Fn(&Bytes, &Bytes) -> Option<Bytes> + Send + Sync;

    /// Stores `mapping(key)` if the key is absent. Returns the value left in
    /// the cache.
    async fn compute_if_absent<F>(&self, key: Bytes, mapping: F) -> Result<Option<Bytes>>
    where
        F: Fn(&Bytes) -> Option<Bytes> + Send + Sync;

    /// Stores `value` if absent, otherwise `remapping(current, value)`,
    /// removing the entry when that returns `None`.
    async fn merge<F>(&self, key: Bytes, value: Bytes, remapping: F) -> Result<Option<Bytes>>
    where
        F: Fn(&Bytes, &Bytes) -> Option<Bytes> + Send + Sync;
}

/// Applies `new` over the entry last read at `current`.
async fn apply<C>(
    cache: &C,
    key: &Bytes,
    current: Option<i64>,
    new: Option<Bytes>,
) -> Result<Step>
where
    C: RemoteCacheOperations + ?Sized,
{
    let step = match (current, new) {
        (Some(version), Some(value)) => {
            let response = cache
                .replace_with_version(key.clone(), value.clone(), version)
                .await?;
            match response.status {
                VersionedOperationStatus::Success => Step::Done(Some(value)),
                // Removed since the read; run again so the absent branch decides.
                VersionedOperationStatus::NoSuchKey => Step::Retry,
                VersionedOperationStatus::ModifiedKey => Step::Retry,
            }
        }
        (Some(version), None) => {
            let response = cache.remove_with_version(key.clone(), version).await?;
            match response.status {
                VersionedOperationStatus::Success | VersionedOperationStatus::NoSuchKey => {
                    Step::Done(None)
                }
                VersionedOperationStatus::ModifiedKey => Step::Retry,
            }
        }
        (None, Some(value)) => {
            let result = cache.put_if_absent(key.clone(), value.clone()).await?;
            if result.executed {
                Step::Done(Some(value))
            } else {
                Step::Retry
            }
        }
        (None, None) => Step::Done(None),
    };
    Ok(step)
}

#[async_trait]
impl<T> VersionedOperations for T
where
    T: RemoteCacheOperations + ?Sized,
{
    async fn compute<F>(&self, key: Bytes, remapping: F) -> Result<Option<Bytes>>
    where
        F: Fn(&Bytes, Option<&Bytes>) -> Option<Bytes> + Send + Sync,
    {
        loop {
            let current = self.get_with_version(key.clone()).await?;
            let new = remapping(&key, current.as_ref().map(|c| &c.value));
            let version = current.map(|c| c.version);
            if let Step::Done(value) = apply(self, &key, version, new).await? {
                return Ok(value);
            }
            tracing::trace!(cache = %self.name(), "compute conflict, retrying");
        }
    }

    async fn compute_if_present<F>(&self, key: Bytes, remapping: F) -> Result<Option<Bytes>>
    where
        F: Fn(&Bytes, &Bytes) -> Option<Bytes> + Send + Sync,
    {
        loop {
            let Some(current) = self.get_with_version(key.clone()).await? else {
                return Ok(None);
            };
            let new = remapping(&key, &current.value);
            let step = match new {
                Some(value) => {
                    let response = self
                        .replace_with_version(key.clone(), value.clone(), current.version)
                        .await?;
                    match response.status {
                        VersionedOperationStatus::Success => Step::Done(Some(value)),
                        VersionedOperationStatus::NoSuchKey => Step::Done(None),
                        VersionedOperationStatus::ModifiedKey => Step::Retry,
                    }
                }
                None => apply(self, &key, Some(current.version), None).await?,
            };
            if let Step::Done(value) = step {
                return Ok(value);
            }
            tracing::trace!(cache = %self.name(), "compute_if_present conflict, retrying");
        }
    }

    async fn compute_if_absent<F>(&self, key: Bytes, mapping: F) -> Result<Option<Bytes>>
    where
        F: Fn(&Bytes) -> Option<Bytes> + Send + Sync,
    {
        loop {
            if let Some(current) = self.get(key.clone()).await? {
                return Ok(Some(current));
            }
            let Some(value) = mapping(&key) else {
                return Ok(None);
            };
            if let Step::Done(value) = apply(self, &key, None, Some(value)).await? {
                return Ok(value);
            }
            tracing::trace!(cache = %self.name(), "compute_if_absent conflict, retrying");
        }
    }

    async fn merge<F>(&self, key: Bytes, value: Bytes, remapping: F) -> Result<Option<Bytes>>
    where
        F: Fn(&Bytes, &Bytes) -> Option<Bytes> + Send + Sync,
    {
        loop {
            let current = self.get_with_version(key.clone()).await?;
            let (version, new) = match current {
                Some(current) => (Some(current.version), remapping(&current.value, &value)),
                None => (None, Some(value.clone())),
            };
            if let Step::Done(value) = apply(self, &key, version, new).await? {
                return Ok(value);
            }
            tracing::trace!(cache = %self.name(), "merge conflict, retrying");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{ClientCacheListener, ListenerId};
    use crate::proxy::{ServerStatistics, VersionedOperationResponse, WriteResult};
    use hotrod_core::protocol::{Expiration, MetadataValue, VersionedValue};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Versioned map that lets a test inject concurrent writers.
    #[derive(Default)]
    struct Store {
        entries: Mutex<HashMap<Bytes, (Bytes, i64)>>,
        version: Mutex<i64>,
        /// Writes applied by "another client" right after each read.
        interference: Mutex<Vec<Bytes>>,
        conditional_writes: AtomicUsize,
    }

    impl Store {
        fn insert(&self, key: &Bytes, value: Bytes) {
            let mut version = self.version.lock().unwrap();
            *version += 1;
            self.entries
                .lock()
                .unwrap()
                .insert(key.clone(), (value, *version));
        }

        fn value(&self, key: &Bytes) -> Option<Bytes> {
            self.entries.lock().unwrap().get(key).map(|e| e.0.clone())
        }
    }

    #[async_trait]
    impl RemoteCacheOperations for Store {
        fn name(&self) -> &str {
            "store"
        }

        async fn get(&self, key: Bytes) -> Result<Option<Bytes>> {
            Ok(self.value(&key))
        }

        async fn get_with_version(&self, key: Bytes) -> Result<Option<VersionedValue>> {
            let current = self
                .entries
                .lock()
                .unwrap()
                .get(&key)
                .map(|(value, version)| VersionedValue {
                    value: value.clone(),
                    version: *version,
                });
            let injected = self.interference.lock().unwrap().pop();
            if let Some(value) = injected {
                self.insert(&key, value);
            }
            Ok(current)
        }

        async fn get_with_metadata(&self, _key: Bytes) -> Result<Option<MetadataValue>> {
            Ok(None)
        }

        async fn contains_key(&self, key: Bytes) -> Result<bool> {
            Ok(self.value(&key).is_some())
        }

        async fn put_with_expiry(
            &self,
            key: Bytes,
            value: Bytes,
            _expiration: Expiration,
        ) -> Result<Option<Bytes>> {
            self.insert(&key, value);
            Ok(None)
        }

        async fn put_if_absent_with_expiry(
            &self,
            key: Bytes,
            value: Bytes,
            _expiration: Expiration,
        ) -> Result<WriteResult> {
            self.conditional_writes.fetch_add(1, Ordering::Relaxed);
            let executed = self.value(&key).is_none();
            if executed {
                self.insert(&key, value);
            }
            Ok(WriteResult {
                executed,
                previous: None,
            })
        }

        async fn replace_with_expiry(
            &self,
            key: Bytes,
            value: Bytes,
            _expiration: Expiration,
        ) -> Result<WriteResult> {
            let executed = self.value(&key).is_some();
            if executed {
                self.insert(&key, value);
            }
            Ok(WriteResult {
                executed,
                previous: None,
            })
        }

        async fn replace_with_version(
            &self,
            key: Bytes,
            value: Bytes,
            version: i64,
        ) -> Result<VersionedOperationResponse> {
            self.conditional_writes.fetch_add(1, Ordering::Relaxed);
            let current = self.entries.lock().unwrap().get(&key).map(|e| e.1);
            let status = match current {
                None => VersionedOperationStatus::NoSuchKey,
                Some(v) if v != version => VersionedOperationStatus::ModifiedKey,
                Some(_) => {
                    self.insert(&key, value);
                    VersionedOperationStatus::Success
                }
            };
            Ok(VersionedOperationResponse {
                value: None,
                status,
            })
        }

        async fn remove(&self, key: Bytes) -> Result<WriteResult> {
            let old = self.entries.lock().unwrap().remove(&key);
            Ok(WriteResult {
                executed: old.is_some(),
                previous: None,
            })
        }

        async fn remove_with_version(
            &self,
            key: Bytes,
            version: i64,
        ) -> Result<VersionedOperationResponse> {
            self.conditional_writes.fetch_add(1, Ordering::Relaxed);
            let mut entries = self.entries.lock().unwrap();
            let status = match entries.get(&key).map(|e| e.1) {
                None => VersionedOperationStatus::NoSuchKey,
                Some(v) if v != version => VersionedOperationStatus::ModifiedKey,
                Some(_) => {
                    entries.remove(&key);
                    VersionedOperationStatus::Success
                }
            };
            Ok(VersionedOperationResponse {
                value: None,
                status,
            })
        }

        async fn clear(&self) -> Result<()> {
            self.entries.lock().unwrap().clear();
            Ok(())
        }

        async fn size(&self) -> Result<u64> {
            Ok(self.entries.lock().unwrap().len() as u64)
        }

        async fn stats(&self) -> Result<ServerStatistics> {
            Ok(ServerStatistics::default())
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn add_client_listener(
            &self,
            _listener: Arc<dyn ClientCacheListener>,
        ) -> Result<ListenerId> {
            Ok(ListenerId::new())
        }

        async fn remove_client_listener(&self, _id: ListenerId) -> Result<()> {
            Ok(())
        }
    }

    fn key() -> Bytes {
        Bytes::from_static(b"counter")
    }

    fn increment(_key: &Bytes, current: Option<&Bytes>) -> Option<Bytes> {
        let n: u64 = current
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        Some(Bytes::from((n + 1).to_string()))
    }

    #[tokio::test]
    async fn test_compute_single_attempt_without_contention() {
        let store = Store::default();
        store.insert(&key(), Bytes::from_static(b"41"));

        let result = store.compute(key(), increment).await.unwrap();
        assert_eq!(result, Some(Bytes::from_static(b"42")));
        assert_eq!(store.conditional_writes.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_compute_retries_after_concurrent_write() {
        let store = Store::default();
        store.insert(&key(), Bytes::from_static(b"1"));
        store
            .interference
            .lock()
            .unwrap()
            .push(Bytes::from_static(b"10"));

        let result = store.compute(key(), increment).await.unwrap();
        assert_eq!(result, Some(Bytes::from_static(b"11")));
        assert_eq!(store.value(&key()), Some(Bytes::from_static(b"11")));
        assert_eq!(store.conditional_writes.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_compute_absent_inserts() {
        let store = Store::default();
        let result = store.compute(key(), increment).await.unwrap();
        assert_eq!(result, Some(Bytes::from_static(b"1")));
    }

    #[tokio::test]
    async fn test_compute_none_removes() {
        let store = Store::default();
        store.insert(&key(), Bytes::from_static(b"x"));
        let result = store.compute(key(), |_, _| None).await.unwrap();
        assert_eq!(result, None);
        assert_eq!(store.value(&key()), None);
    }

    #[tokio::test]
    async fn test_compute_if_present_skips_absent() {
        let store = Store::default();
        let result = store
            .compute_if_present(key(), |_, _| Some(Bytes::from_static(b"never")))
            .await
            .unwrap();
        assert_eq!(result, None);
        assert_eq!(store.conditional_writes.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_compute_if_absent_keeps_existing() {
        let store = Store::default();
        store.insert(&key(), Bytes::from_static(b"old"));
        let result = store
            .compute_if_absent(key(), |_| Some(Bytes::from_static(b"new")))
            .await
            .unwrap();
        assert_eq!(result, Some(Bytes::from_static(b"old")));

        let other = Bytes::from_static(b"other");
        let result = store
            .compute_if_absent(other.clone(), |_| Some(Bytes::from_static(b"new")))
            .await
            .unwrap();
        assert_eq!(result, Some(Bytes::from_static(b"new")));
        assert_eq!(store.value(&other), Some(Bytes::from_static(b"new")));
    }

    #[tokio::test]
    async fn test_merge_concatenates() {
        let store = Store::default();
        let append = |old: &Bytes, new: &Bytes| {
            let mut merged = old.to_vec();
            merged.extend_from_slice(new);
            Some(Bytes::from(merged))
        };

        let first = store
            .merge(key(), Bytes::from_static(b"a"), append)
            .await
            .unwrap();
        assert_eq!(first, Some(Bytes::from_static(b"a")));
        let second = store
            .merge(key(), Bytes::from_static(b"b"), append)
            .await
            .unwrap();
        assert_eq!(second, Some(Bytes::from_static(b"ab")));
    }
}
