mod common;

use common::{config_for, eventually, key, MockServer};
use hotrod_client::core::protocol::constants::*;
use hotrod_client::{
    ClientConfigBuilder, NearCacheConfig, NearCacheMode, RemoteCacheManager,
    RemoteCacheOperations,
};

fn with_near_cache(builder: ClientConfigBuilder, mode: NearCacheMode) -> ClientConfigBuilder {
    builder.add_near_cache_config(
        NearCacheConfig::builder("near*")
            .mode(mode)
            .max_entries(100)
            .build()
            .unwrap(),
    )
}

#[tokio::test]
async fn test_repeated_reads_served_locally() {
    let server = MockServer::start().await;
    server.cluster().insert(b"k", b"v");
    let config = with_near_cache(config_for(&[&server]), NearCacheMode::Invalidated)
        .build()
        .unwrap();
    let manager = RemoteCacheManager::start(config).await.unwrap();
    let cache = manager.cache("near-orders").await.unwrap();

    assert_eq!(cache.get(key("k")).await.unwrap(), Some(key("v")));
    assert_eq!(cache.get(key("k")).await.unwrap(), Some(key("v")));
    assert!(cache.contains_key(key("k")).await.unwrap());

    assert_eq!(server.count(GET_WITH_METADATA_REQUEST), 1);
    assert_eq!(server.count(GET_REQUEST), 0);
    assert_eq!(server.count(CONTAINS_KEY_REQUEST), 0);

    let stats = manager.statistics();
    assert_eq!(stats.near_cache_hits(), 1);
    assert_eq!(stats.near_cache_misses(), 1);
    manager.stop().await;
}

#[tokio::test]
async fn test_own_writes_are_visible() {
    let server = MockServer::start().await;
    let config = with_near_cache(config_for(&[&server]), NearCacheMode::Eager)
        .build()
        .unwrap();
    let manager = RemoteCacheManager::start(config).await.unwrap();
    let cache = manager.cache("near").await.unwrap();

    cache.put(key("k"), key("v1")).await.unwrap();
    assert_eq!(cache.get(key("k")).await.unwrap(), Some(key("v1")));
    cache.put(key("k"), key("v2")).await.unwrap();
    assert_eq!(cache.get(key("k")).await.unwrap(), Some(key("v2")));

    assert!(cache.replace(key("k"), key("v3")).await.unwrap().executed);
    assert_eq!(cache.get(key("k")).await.unwrap(), Some(key("v3")));

    let current = cache.get_with_version(key("k")).await.unwrap().unwrap();
    let replaced = cache
        .replace_with_version(key("k"), key("v4"), current.version)
        .await
        .unwrap();
    assert!(replaced.is_success());
    assert_eq!(cache.get(key("k")).await.unwrap(), Some(key("v4")));

    assert!(cache.remove(key("k")).await.unwrap().executed);
    assert_eq!(cache.get(key("k")).await.unwrap(), None);
    assert_eq!(server.count(ADD_CLIENT_LISTENER_REQUEST), 0);
    manager.stop().await;
}

#[tokio::test]
async fn test_remote_write_invalidates() {
    let server = MockServer::start().await;
    server.cluster().insert(b"k", b"old");

    let near = RemoteCacheManager::start(
        with_near_cache(config_for(&[&server]), NearCacheMode::Invalidated)
            .build()
            .unwrap(),
    )
    .await
    .unwrap();
    let other = RemoteCacheManager::start(config_for(&[&server]).build().unwrap())
        .await
        .unwrap();

    let cache = near.cache("near").await.unwrap();
    assert_eq!(cache.get(key("k")).await.unwrap(), Some(key("old")));
    assert_eq!(server.cluster().subscriber_count(), 1);

    other.remote_cache("near").put(key("k"), key("new")).await.unwrap();
    assert!(eventually(|| near.statistics().near_cache_invalidations() == 1).await);
    assert_eq!(cache.get(key("k")).await.unwrap(), Some(key("new")));
    assert_eq!(server.count(GET_WITH_METADATA_REQUEST), 2);

    near.stop().await;
    other.stop().await;
}

#[tokio::test]
async fn test_handles_share_one_near_cache() {
    let server = MockServer::start().await;
    server.cluster().insert(b"k", b"v");
    let manager = RemoteCacheManager::start(
        with_near_cache(config_for(&[&server]), NearCacheMode::Invalidated)
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    let first = manager.cache("near").await.unwrap();
    let second = manager.cache("near").await.unwrap();
    first.get(key("k")).await.unwrap();
    second.get(key("k")).await.unwrap();

    assert_eq!(server.count(ADD_CLIENT_LISTENER_REQUEST), 1);
    assert_eq!(server.count(GET_WITH_METADATA_REQUEST), 1);

    // Names without a matching configuration bypass the near cache.
    let plain = manager.cache("far").await.unwrap();
    plain.get(key("k")).await.unwrap();
    plain.get(key("k")).await.unwrap();
    assert_eq!(server.count(GET_REQUEST), 2);
    manager.stop().await;
}

#[tokio::test]
async fn test_stop_removes_listener() {
    let server = MockServer::start().await;
    let manager = RemoteCacheManager::start(
        with_near_cache(config_for(&[&server]), NearCacheMode::Invalidated)
            .build()
            .unwrap(),
    )
    .await
    .unwrap();
    manager.cache("near").await.unwrap();
    assert_eq!(server.cluster().subscriber_count(), 1);

    manager.stop().await;
    assert_eq!(server.count(REMOVE_CLIENT_LISTENER_REQUEST), 1);
    assert_eq!(server.cluster().subscriber_count(), 0);
}

#[tokio::test]
async fn test_invalidations_resume_after_connection_loss() {
    let server = MockServer::start().await;
    server.cluster().insert(b"k", b"v1");
    let near = RemoteCacheManager::start(
        with_near_cache(config_for(&[&server]), NearCacheMode::Invalidated)
            .build()
            .unwrap(),
    )
    .await
    .unwrap();
    let other = RemoteCacheManager::start(config_for(&[&server]).build().unwrap())
        .await
        .unwrap();

    let cache = near.cache("near").await.unwrap();
    assert_eq!(cache.get(key("k")).await.unwrap(), Some(key("v1")));

    // The server drops the connection carrying the listener.
    server.fail_next(1);
    assert!(cache.ping().await.is_err());
    assert!(eventually(|| server.count(ADD_CLIENT_LISTENER_REQUEST) == 2).await);

    // Cleared on failover, so this read goes to the server again.
    assert_eq!(cache.get(key("k")).await.unwrap(), Some(key("v1")));
    assert_eq!(server.count(GET_WITH_METADATA_REQUEST), 2);

    other.remote_cache("near").put(key("k"), key("v2")).await.unwrap();
    assert!(eventually(|| near.statistics().near_cache_invalidations() == 1).await);
    assert_eq!(cache.get(key("k")).await.unwrap(), Some(key("v2")));
    assert_eq!(server.cluster().subscriber_count(), 1);

    near.stop().await;
    other.stop().await;
}
