//! Async Rust client for Hot Rod, the binary protocol of remote Infinispan
//! style caches.
//!
//! The client is built on [Tokio](https://tokio.rs/) and exposes every
//! operation as an `async fn`. It routes each key to the server owning its
//! segment, follows topology changes pushed by the servers, retries on
//! other servers when one fails, and can keep a near cache of hot entries.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use hotrod_client::{ClientConfig, RemoteCacheManager, RemoteCacheOperations};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .add_server("127.0.0.1:11222")
//!         .build()?;
//!     let manager = RemoteCacheManager::start(config).await?;
//!
//!     let cache = manager.cache("sessions").await?;
//!     cache.put(Bytes::from("key"), Bytes::from("value")).await?;
//!     let value = cache.get(Bytes::from("key")).await?;
//!     println!("{:?}", value);
//!
//!     manager.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Atomic updates
//!
//! [`VersionedOperations`] adds `compute`, `compute_if_present`,
//! `compute_if_absent` and `merge` to every cache handle. They retry an
//! optimistic read-modify-write loop over entry versions until it wins.
//!
//! # Near caching
//!
//! Register a [`NearCacheConfig`] for a cache name (or a `prefix*` pattern)
//! and [`RemoteCacheManager::cache`] returns a handle reading through a
//! local copy. In [`NearCacheMode::Invalidated`] a server listener keeps
//! the copy consistent with writes from other clients.
//!
//! # Feature flags
//!
//! - `metrics`: Prometheus counters and histograms for every operation,
//!   see [`metrics::ClientMetrics`].

#![warn(missing_docs)]

pub mod cache;
mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod listener;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod proxy;
pub mod statistics;
pub mod topology;

pub use cache::{EvictionPolicy, NearCache, NearCacheConfig, NearCacheConfigBuilder, NearCacheMode};
pub use client::{RemoteCacheManager, DEFAULT_CLUSTER_NAME};
pub use config::{
    BalancingStrategy, ClientConfig, ClientConfigBuilder, ClusterConfig, ConfigError,
    ConnectionPoolConfig, ConnectionPoolConfigBuilder, ExhaustedAction,
};
pub use dispatcher::OperationDispatcher;
pub use hotrod_core as core;
pub use hotrod_core::protocol::{Expiration, MetadataValue, VersionedValue};
pub use hotrod_core::{HotRodError, Result, ServerAddress};
pub use listener::{ClientCacheListener, ListenerId};
#[cfg(feature = "metrics")]
pub use metrics::{ClientMetrics, MetricsError};
pub use proxy::{
    NearCachedRemoteCache, RemoteCache, RemoteCacheOperations, ServerStatistics,
    VersionedOperationResponse, VersionedOperationStatus, VersionedOperations, WriteResult,
};
pub use statistics::{ClientStatistics, StatisticsSnapshot};
pub use topology::ClientIntelligence;
