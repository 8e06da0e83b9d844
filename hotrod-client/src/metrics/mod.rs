//! Prometheus metrics for the Hot Rod client.
//!
//! Enable the `metrics` feature flag to use this module. The dispatcher
//! records every remote operation once it completes, including the retries
//! it took and the topology updates it applied. Connections count their
//! own opening and closing.
//!
//! # Example
//!
//! ```rust,ignore
//! use hotrod_client::metrics::ClientMetrics;
//!
//! let metrics = Arc::new(ClientMetrics::new("orders")?);
//! let manager = RemoteCacheManager::start_with_metrics(config, Arc::clone(&metrics)).await?;
//!
//! // Export for Prometheus scraping
//! let text = metrics.encode_text()?;
//! ```

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

use hotrod_core::HotRodError;

/// Prometheus metrics for one client.
#[derive(Clone)]
pub struct ClientMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
    errors_total: IntCounterVec,
    retries_total: IntCounter,
    topology_updates_total: IntCounter,
    connections_opened_total: IntCounter,
    connections_closed_total: IntCounter,
}

fn metric_error(e: prometheus::Error) -> MetricsError {
    MetricsError::new(format!("metric registration failed: {}", e))
}

impl ClientMetrics {
    /// Creates and registers the metrics, each name prefixed by `prefix`.
    pub fn new(prefix: &str) -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(
                format!("{}_requests_total", prefix),
                "Completed remote operations by operation name",
            ),
            &["operation"],
        )
        .map_err(metric_error)?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                format!("{}_request_duration_seconds", prefix),
                "Remote operation duration in seconds, retries included",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
            &["operation"],
        )
        .map_err(metric_error)?;

        let errors_total = IntCounterVec::new(
            Opts::new(
                format!("{}_errors_total", prefix),
                "Failed remote operations by error type",
            ),
            &["error_type"],
        )
        .map_err(metric_error)?;

        let retries_total = IntCounter::with_opts(Opts::new(
            format!("{}_retries_total", prefix),
            "Attempts repeated on another server",
        ))
        .map_err(metric_error)?;

        let topology_updates_total = IntCounter::with_opts(Opts::new(
            format!("{}_topology_updates_total", prefix),
            "Topology updates applied",
        ))
        .map_err(metric_error)?;

        let connections_opened_total = IntCounter::with_opts(Opts::new(
            format!("{}_connections_opened_total", prefix),
            "Connections established to servers",
        ))
        .map_err(metric_error)?;

        let connections_closed_total = IntCounter::with_opts(Opts::new(
            format!("{}_connections_closed_total", prefix),
            "Connections closed by the client or the server",
        ))
        .map_err(metric_error)?;

        registry
            .register(Box::new(requests_total.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(request_duration_seconds.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(errors_total.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(retries_total.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(topology_updates_total.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(connections_opened_total.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(connections_closed_total.clone()))
            .map_err(metric_error)?;

        Ok(Self {
            registry,
            requests_total,
            request_duration_seconds,
            errors_total,
            retries_total,
            topology_updates_total,
            connections_opened_total,
            connections_closed_total,
        })
    }

    /// Records a completed operation with its duration.
    pub fn record_request(&self, operation: &str, duration: Duration) {
        self.requests_total.with_label_values(&[operation]).inc();
        self.request_duration_seconds
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Records a failed operation.
    pub fn record_error(&self, error: &HotRodError) {
        self.errors_total
            .with_label_values(&[error_types::classify(error)])
            .inc();
    }

    /// Records a retried attempt.
    pub fn record_retry(&self) {
        self.retries_total.inc();
    }

    /// Records an applied topology update.
    pub fn record_topology_update(&self) {
        self.topology_updates_total.inc();
    }

    /// Records an established connection.
    pub fn record_connection_opened(&self) {
        self.connections_opened_total.inc();
    }

    /// Records a connection teardown.
    pub fn record_connection_closed(&self) {
        self.connections_closed_total.inc();
    }

    /// Total retried attempts.
    pub fn retries(&self) -> u64 {
        self.retries_total.get()
    }

    /// Gathers all metric families for Prometheus exposition.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Encodes all metrics in the Prometheus text format.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::new(format!("encoding failed: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::new(format!("invalid UTF-8: {}", e)))
    }

    /// The underlying registry, for registering additional metrics.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for ClientMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMetrics")
            .field("retries_total", &self.retries_total.get())
            .field("topology_updates_total", &self.topology_updates_total.get())
            .field("connections_opened_total", &self.connections_opened_total.get())
            .field("connections_closed_total", &self.connections_closed_total.get())
            .finish_non_exhaustive()
    }
}

/// Error type for metrics operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsError {
    message: String,
}

impl MetricsError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for MetricsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "metrics error: {}", self.message)
    }
}

impl std::error::Error for MetricsError {}

/// Labels used for the `error_type` dimension.
pub mod error_types {
    use hotrod_core::HotRodError;

    /// Transport failure.
    pub const CONNECTION: &str = "connection";
    /// Framing violation.
    pub const PROTOCOL: &str = "protocol";
    /// Error status reported by the server.
    pub const SERVER: &str = "server";
    /// Server side command timeout.
    pub const COMMAND_TIMEOUT: &str = "command_timeout";
    /// Client side timeout.
    pub const TIMEOUT: &str = "timeout";
    /// Anything else.
    pub const OTHER: &str = "other";

    /// Label for an error.
    pub fn classify(error: &HotRodError) -> &'static str {
        match error {
            HotRodError::Connection(_) | HotRodError::Io(_) => CONNECTION,
            HotRodError::Protocol(_) => PROTOCOL,
            HotRodError::Server { .. } => SERVER,
            HotRodError::CommandTimeout(_) => COMMAND_TIMEOUT,
            HotRodError::Timeout(_) => TIMEOUT,
            HotRodError::Configuration(_) | HotRodError::IllegalState(_) => OTHER,
        }
    }
}
