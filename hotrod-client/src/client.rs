//! Hot Rod client entry point.

use std::collections::HashMap;
use std::sync::Arc;

use hotrod_core::protocol::constants::DEFAULT_CACHE_NAME;
use hotrod_core::protocol::Request;
use hotrod_core::{HashFunctionRegistry, Result};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::cache::NearCache;
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionOptions};
use crate::dispatcher::OperationDispatcher;
use crate::listener::ListenerRegistry;
#[cfg(feature = "metrics")]
use crate::metrics::ClientMetrics;
use crate::proxy::{NearCachedRemoteCache, RemoteCache, RemoteCacheOperations};
use crate::statistics::{ClientStatistics, StatisticsSnapshot};
use crate::topology::{ClusterInfo, TopologyTracker};

/// Name of the cluster built from [`ClientConfig::servers`].
pub const DEFAULT_CLUSTER_NAME: &str = "default";

/// The main entry point for talking to a Hot Rod cluster.
///
/// Owns the connection pools, the topology tracker, the dispatcher and the
/// event task. Cache handles obtained from it stay valid until
/// [`stop`](Self::stop).
///
/// # Example
///
/// ```ignore
/// use bytes::Bytes;
/// use hotrod_client::{ClientConfig, RemoteCacheManager, RemoteCacheOperations};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ClientConfig::builder()
///         .add_server("127.0.0.1:11222")
///         .build()?;
///
///     let manager = RemoteCacheManager::start(config).await?;
///     let cache = manager.cache("sessions").await?;
///
///     cache.put(Bytes::from("key"), Bytes::from("value")).await?;
///     let value = cache.get(Bytes::from("key")).await?;
///
///     manager.stop().await;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct RemoteCacheManager {
    config: Arc<ClientConfig>,
    dispatcher: Arc<OperationDispatcher>,
    listeners: Arc<ListenerRegistry>,
    statistics: Arc<ClientStatistics>,
    near_cached: Mutex<HashMap<String, Arc<NearCachedRemoteCache<RemoteCache>>>>,
    event_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RemoteCacheManager {
    /// Creates a manager and, when configured, pings an initial server.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured clusters cannot be tracked.
    /// Servers are contacted lazily, so unreachable servers only surface on
    /// the first operation.
    #[tracing::instrument(
        name = "manager.start",
        skip_all,
        fields(servers = config.servers().len())
    )]
    pub async fn start(config: ClientConfig) -> Result<Self> {
        let manager = Self::build(config, |dispatcher| dispatcher)?;
        manager.ping_on_start().await;
        Ok(manager)
    }

    /// Like [`start`](Self::start), recording Prometheus metrics.
    #[cfg(feature = "metrics")]
    pub async fn start_with_metrics(
        config: ClientConfig,
        metrics: Arc<ClientMetrics>,
    ) -> Result<Self> {
        let manager = Self::build(config, |dispatcher| dispatcher.with_metrics(metrics))?;
        manager.ping_on_start().await;
        Ok(manager)
    }

    fn build(
        config: ClientConfig,
        decorate: impl FnOnce(OperationDispatcher) -> OperationDispatcher,
    ) -> Result<Self> {
        let config = Arc::new(config);

        let mut clusters = vec![ClusterInfo::new(
            DEFAULT_CLUSTER_NAME,
            config.servers().to_vec(),
            config.client_intelligence(),
        )];
        clusters.extend(config.clusters().iter().map(|c| {
            ClusterInfo::new(
                c.name(),
                c.servers().to_vec(),
                c.client_intelligence()
                    .unwrap_or_else(|| config.client_intelligence()),
            )
        }));
        let tracker = Arc::new(TopologyTracker::new(
            clusters,
            config.balancing_strategy(),
            HashFunctionRegistry::new(),
        )?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connections = Arc::new(ConnectionManager::new(
            ConnectionOptions::from_config(&config),
            config.pool().clone(),
            Some(events_tx),
        ));

        let statistics = Arc::new(ClientStatistics::new());
        let dispatcher = Arc::new(decorate(OperationDispatcher::new(
            Arc::clone(&config),
            tracker,
            connections,
            Arc::clone(&statistics),
        )));

        let listeners = Arc::new(ListenerRegistry::new());
        let event_task = listeners.spawn_dispatcher(events_rx, Arc::downgrade(&dispatcher));

        tracing::info!(
            servers = config.servers().len(),
            clusters = config.clusters().len() + 1,
            intelligence = ?config.client_intelligence(),
            "hot rod client started"
        );

        Ok(Self {
            config,
            dispatcher,
            listeners,
            statistics,
            near_cached: Mutex::new(HashMap::new()),
            event_task: std::sync::Mutex::new(Some(event_task)),
        })
    }

    async fn ping_on_start(&self) {
        if !self.config.ping_on_start() {
            return;
        }
        if let Err(e) = self
            .dispatcher
            .execute(DEFAULT_CACHE_NAME, 0, Request::Ping)
            .await
        {
            tracing::warn!(error = %e, "initial ping failed");
        }
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// A plain handle on `name`, bypassing any near cache.
    pub fn remote_cache(&self, name: &str) -> RemoteCache {
        RemoteCache::new(
            name,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.listeners),
        )
    }

    /// A handle on `name`.
    ///
    /// When a near cache configuration matches the name, the handle reads
    /// through a near cache shared by every handle on that cache.
    ///
    /// # Errors
    ///
    /// Fails if an invalidated near cache cannot register its listener.
    pub async fn cache(&self, name: &str) -> Result<Arc<dyn RemoteCacheOperations>> {
        let near_config = self
            .config
            .find_near_cache(name)
            .filter(|c| c.mode().enabled())
            .cloned();
        let Some(near_config) = near_config else {
            return Ok(Arc::new(self.remote_cache(name)));
        };

        let mut near_cached = self.near_cached.lock().await;
        if let Some(cache) = near_cached.get(name) {
            return Ok(Arc::clone(cache) as Arc<dyn RemoteCacheOperations>);
        }
        let near_cache = Arc::new(NearCache::with_statistics(
            near_config,
            Arc::clone(&self.statistics),
        ));
        let cache = Arc::new(
            NearCachedRemoteCache::start(
                self.remote_cache(name),
                near_cache,
                self.config.force_return_values(),
            )
            .await?,
        );
        near_cached.insert(name.to_string(), Arc::clone(&cache));
        Ok(cache)
    }

    /// Fails over to the named cluster.
    ///
    /// Every cache drops its current topology and routes to the initial
    /// servers of that cluster.
    pub fn switch_to_cluster(&self, name: &str) -> Result<()> {
        self.dispatcher.switch_cluster(name).map(|_| ())
    }

    /// Returns to the cluster built from the top level server list.
    pub fn switch_to_default_cluster(&self) -> Result<()> {
        let name = self.dispatcher.tracker().clusters()[0].name().to_string();
        self.switch_to_cluster(&name)
    }

    /// Name of the cluster currently in use.
    pub fn active_cluster(&self) -> String {
        self.dispatcher.tracker().active_cluster().name().to_string()
    }

    /// Client-wide statistics.
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }

    /// Zeroes the client-wide statistics.
    pub fn reset_statistics(&self) {
        self.statistics.reset();
    }

    /// The dispatcher shared by every handle.
    pub fn dispatcher(&self) -> &Arc<OperationDispatcher> {
        &self.dispatcher
    }

    /// Unregisters near cache listeners, stops event delivery and closes
    /// every connection.
    ///
    /// Event delivery stops first, so closing the connections does not
    /// fail any listener over.
    pub async fn stop(&self) {
        tracing::info!("stopping hot rod client");
        let near_cached: Vec<_> = self.near_cached.lock().await.drain().collect();
        for (name, cache) in near_cached {
            if let Err(e) = cache.stop().await {
                tracing::debug!(cache = %name, error = %e, "near cache listener not removed");
            }
        }

        let task = match self.event_task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
        self.dispatcher.shutdown();
    }
}
