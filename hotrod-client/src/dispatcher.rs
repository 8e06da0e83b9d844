//! Sends operations to the right server and retries them elsewhere on failure.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use hotrod_core::protocol::{
    MessageIdGenerator, Request, RequestFrame, RequestHeader, Response, TopologyUpdate,
};
use hotrod_core::{HotRodError, Result, ServerAddress};
use tracing::instrument;

use crate::config::ClientConfig;
use crate::connection::{ConnectionId, ConnectionManager};
#[cfg(feature = "metrics")]
use crate::metrics::ClientMetrics;
use crate::statistics::{ClientStatistics, OperationType};
use crate::topology::{ClusterInfo, TopologyTracker};

/// Executes single operations against the cluster.
///
/// Owns the message id counter of its client. Every response passes through
/// here, so this is where topology frames are applied and statistics are
/// recorded.
#[derive(Debug)]
pub struct OperationDispatcher {
    config: Arc<ClientConfig>,
    tracker: Arc<TopologyTracker>,
    connections: Arc<ConnectionManager>,
    message_ids: MessageIdGenerator,
    statistics: Arc<ClientStatistics>,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<ClientMetrics>>,
}

impl OperationDispatcher {
    /// Creates a dispatcher.
    pub fn new(
        config: Arc<ClientConfig>,
        tracker: Arc<TopologyTracker>,
        connections: Arc<ConnectionManager>,
        statistics: Arc<ClientStatistics>,
    ) -> Self {
        Self {
            config,
            tracker,
            connections,
            message_ids: MessageIdGenerator::new(),
            statistics,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Attaches Prometheus metrics.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<ClientMetrics>) -> Self {
        self.connections.attach_metrics(Arc::clone(&metrics));
        self.metrics = Some(metrics);
        self
    }

    /// The topology tracker.
    pub fn tracker(&self) -> &Arc<TopologyTracker> {
        &self.tracker
    }

    /// The statistics this dispatcher records into.
    pub fn statistics(&self) -> &Arc<ClientStatistics> {
        &self.statistics
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Executes `request` against `cache_name`, retrying on other servers.
    ///
    /// At most `max_retries` attempts are made (at least one). Each attempt
    /// picks a server not yet tried by this operation. When every known
    /// server failed, the cache falls back to its initial servers, or the
    /// client fails over to the next cluster once those failed too.
    #[instrument(
        name = "dispatcher.execute",
        skip(self, request),
        fields(operation = request.name())
    )]
    pub async fn execute(
        &self,
        cache_name: &str,
        flags: u32,
        request: Request,
    ) -> Result<Response> {
        let started = Instant::now();
        let attempts = self.config.max_retries().max(1);
        let mut failed: HashSet<ServerAddress> = HashSet::new();
        let mut cluster_switches = 0;
        let mut last_error = None;

        for attempt in 1..=attempts {
            let selected =
                self.select_server(cache_name, &request, &mut failed, &mut cluster_switches);
            let Some(server) = selected else {
                break;
            };

            match self.execute_on(&server, cache_name, flags, request.clone()).await {
                Ok(response) => {
                    self.record_success(&request, &response, started);
                    return Ok(response);
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        server = %server,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "attempt failed"
                    );
                    failed.insert(server);
                    if attempt < attempts {
                        self.statistics.record_retry();
                        #[cfg(feature = "metrics")]
                        if let Some(metrics) = &self.metrics {
                            metrics.record_retry();
                        }
                    }
                    last_error = Some(e);
                }
                Err(e) => {
                    self.record_failure(&e);
                    return Err(e);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| {
            HotRodError::Connection(format!("no server available for cache '{}'", cache_name))
        });
        self.record_failure(&error);
        Err(error)
    }

    fn select_server(
        &self,
        cache_name: &str,
        request: &Request,
        failed: &mut HashSet<ServerAddress>,
        cluster_switches: &mut usize,
    ) -> Option<ServerAddress> {
        let key = request.key().map(|k| &k[..]);
        if let Some(server) = self.tracker.route(cache_name, key, failed) {
            return Some(server);
        }

        let cluster = self.tracker.active_cluster();
        if cluster.initial_servers().iter().any(|s| !failed.contains(s)) {
            tracing::info!(
                cache = cache_name,
                "all known servers failed, resetting to initial servers"
            );
            self.tracker.reset(cache_name);
            return self.tracker.route(cache_name, key, failed);
        }

        if *cluster_switches + 1 < self.tracker.clusters().len() {
            if let Some(next) = self.tracker.next_cluster() {
                tracing::warn!(
                    from = cluster.name(),
                    to = next.name(),
                    "cluster unreachable, failing over"
                );
                if self.switch_cluster(next.name()).is_ok() {
                    *cluster_switches += 1;
                    failed.clear();
                    return self.tracker.route(cache_name, key, failed);
                }
            }
        }
        None
    }

    /// Makes the named cluster active.
    ///
    /// Pools of servers outside the new cluster are closed, so listeners
    /// registered on them fail over.
    pub fn switch_cluster(&self, cluster_name: &str) -> Result<ClusterInfo> {
        let activated = self.tracker.switch_cluster(cluster_name)?;
        let abandoned: Vec<ServerAddress> = self
            .connections
            .servers()
            .into_iter()
            .filter(|s| !activated.initial_servers().contains(s))
            .collect();
        self.connections.close_servers(&abandoned);
        Ok(activated)
    }

    /// Executes one attempt on a given server, without retrying.
    ///
    /// A topology frame carried by the response is applied before this
    /// returns, so the next operation already routes on it.
    pub async fn execute_on(
        &self,
        server: &ServerAddress,
        cache_name: &str,
        flags: u32,
        request: Request,
    ) -> Result<Response> {
        self.execute_on_connection(server, cache_name, flags, request)
            .await
            .map(|(response, _)| response)
    }

    /// Like [`execute_on`](Self::execute_on), also returning the connection
    /// that carried the request.
    ///
    /// Listener registrations need it: their events arrive on that
    /// connection only.
    pub async fn execute_on_connection(
        &self,
        server: &ServerAddress,
        cache_name: &str,
        flags: u32,
        request: Request,
    ) -> Result<(Response, ConnectionId)> {
        let info = self.tracker.get_or_create_cache_info(cache_name);
        let connection = self.connections.acquire(server).await?;

        let message_id = self.message_ids.next_id();
        let expected_opcode = request.response_opcode();
        let frame = RequestFrame {
            header: RequestHeader {
                message_id,
                protocol_version: self.config.protocol_version(),
                opcode: request.opcode(),
                cache_name: cache_name.to_string(),
                flags,
                client_intelligence: info.topology().intelligence().to_byte(),
                topology_id: info.topology_id(),
            },
            request,
        };

        tracing::trace!(server = %server, message_id, "sending request");
        let response = connection.send(frame).await?;

        if let Some(topology) = &response.header.topology {
            self.apply_topology(cache_name, topology, info.topology_age());
        }

        let validated = response.validate(message_id, expected_opcode);
        if let Err(HotRodError::Protocol(_)) = &validated {
            connection.close();
        }
        validated.map(|response| (response, connection.id()))
    }

    fn apply_topology(&self, cache_name: &str, topology: &TopologyUpdate, request_age: i32) {
        let Some(change) = self.tracker.update_topology(cache_name, topology, request_age) else {
            return;
        };
        self.statistics.record_topology_update();
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_topology_update();
        }

        let departed: Vec<ServerAddress> = change
            .removed
            .into_iter()
            .filter(|s| !self.tracker.is_known_server(s))
            .collect();
        if !departed.is_empty() {
            self.connections.close_servers(&departed);
        }
    }

    fn record_success(&self, request: &Request, response: &Response, started: Instant) {
        let elapsed = started.elapsed();
        self.statistics.record_operation(
            OperationType::classify(request.opcode(), response.status()),
            elapsed,
        );
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_request(request.name(), elapsed);
        }
    }

    fn record_failure(&self, error: &HotRodError) {
        tracing::debug!(error = %error, "operation failed");
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_error(error);
        }
    }

    /// Closes every connection.
    pub fn shutdown(&self) {
        self.connections.shutdown();
    }
}
