//! Client configuration types and builders.

use std::time::Duration;

use hotrod_core::protocol::constants::DEFAULT_PROTOCOL_VERSION;
use hotrod_core::{HotRodError, ServerAddress};

use crate::cache::NearCacheConfig;
use crate::topology::ClientIntelligence;

/// Default server when none is configured.
const DEFAULT_SERVER: &str = "127.0.0.1:11222";
/// Default connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default socket (read) timeout.
const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(60);
/// Default maximum retries per operation.
const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default connections per server.
const DEFAULT_MAX_CONNECTIONS: usize = 8;
/// Default in-flight requests per connection.
const DEFAULT_MAX_PENDING_REQUESTS: usize = 64;
/// Default wait for a free connection slot.
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5);

/// Configuration error returned when validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for HotRodError {
    fn from(err: ConfigError) -> Self {
        HotRodError::Configuration(err.message)
    }
}

fn parse_address(address: &str) -> Result<ServerAddress, ConfigError> {
    address
        .parse::<ServerAddress>()
        .map_err(|e| ConfigError::new(e.to_string()))
}

/// What to do when every connection slot of a server is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExhaustedAction {
    /// Wait up to `max_wait` for a slot to free up.
    #[default]
    Wait,
    /// Fail immediately.
    Exception,
}

/// Per-server connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPoolConfig {
    max_connections_per_server: usize,
    max_pending_requests: usize,
    exhausted_action: ExhaustedAction,
    max_wait: Duration,
}

impl ConnectionPoolConfig {
    /// Creates a new pool configuration builder.
    pub fn builder() -> ConnectionPoolConfigBuilder {
        ConnectionPoolConfigBuilder::new()
    }

    /// Maximum connections opened to one server.
    pub fn max_connections_per_server(&self) -> usize {
        self.max_connections_per_server
    }

    /// Maximum requests pipelined on one connection.
    pub fn max_pending_requests(&self) -> usize {
        self.max_pending_requests
    }

    /// Behaviour when the pool is exhausted.
    pub fn exhausted_action(&self) -> ExhaustedAction {
        self.exhausted_action
    }

    /// How long to wait for a slot under [`ExhaustedAction::Wait`].
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_server: DEFAULT_MAX_CONNECTIONS,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            exhausted_action: ExhaustedAction::default(),
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

/// Builder for `ConnectionPoolConfig`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionPoolConfigBuilder {
    max_connections_per_server: Option<usize>,
    max_pending_requests: Option<usize>,
    exhausted_action: Option<ExhaustedAction>,
    max_wait: Option<Duration>,
}

impl ConnectionPoolConfigBuilder {
    /// Creates a new pool configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum connections per server.
    pub fn max_connections_per_server(mut self, max: usize) -> Self {
        self.max_connections_per_server = Some(max);
        self
    }

    /// Sets the maximum pipelined requests per connection.
    pub fn max_pending_requests(mut self, max: usize) -> Self {
        self.max_pending_requests = Some(max);
        self
    }

    /// Sets the exhausted action.
    pub fn exhausted_action(mut self, action: ExhaustedAction) -> Self {
        self.exhausted_action = Some(action);
        self
    }

    /// Sets the maximum wait for a free slot.
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Builds the pool configuration.
    pub fn build(self) -> Result<ConnectionPoolConfig, ConfigError> {
        let max_connections_per_server = self
            .max_connections_per_server
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);
        let max_pending_requests = self
            .max_pending_requests
            .unwrap_or(DEFAULT_MAX_PENDING_REQUESTS);

        if max_connections_per_server == 0 {
            return Err(ConfigError::new("max_connections_per_server must be at least 1"));
        }
        if max_pending_requests == 0 {
            return Err(ConfigError::new("max_pending_requests must be at least 1"));
        }

        Ok(ConnectionPoolConfig {
            max_connections_per_server,
            max_pending_requests,
            exhausted_action: self.exhausted_action.unwrap_or_default(),
            max_wait: self.max_wait.unwrap_or(DEFAULT_MAX_WAIT),
        })
    }
}

/// Load balancing strategy for operations that are not routed by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalancingStrategy {
    /// Cycle through servers in order.
    #[default]
    RoundRobin,
    /// Pick a random server.
    Random,
}

/// A cluster the client can fail over to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    name: String,
    servers: Vec<ServerAddress>,
    client_intelligence: Option<ClientIntelligence>,
}

impl ClusterConfig {
    /// Creates a cluster definition from `host:port` strings.
    pub fn new<I, S>(name: impl Into<String>, servers: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::new("cluster name must not be empty"));
        }
        let servers = servers
            .into_iter()
            .map(|s| parse_address(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if servers.is_empty() {
            return Err(ConfigError::new(format!(
                "cluster '{}' must have at least one server",
                name
            )));
        }
        Ok(Self {
            name,
            servers,
            client_intelligence: None,
        })
    }

    /// Overrides the client intelligence used against this cluster.
    pub fn with_client_intelligence(mut self, intelligence: ClientIntelligence) -> Self {
        self.client_intelligence = Some(intelligence);
        self
    }

    /// Cluster name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Initial servers of the cluster.
    pub fn servers(&self) -> &[ServerAddress] {
        &self.servers
    }

    /// Intelligence override, if any.
    pub fn client_intelligence(&self) -> Option<ClientIntelligence> {
        self.client_intelligence
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    servers: Vec<ServerAddress>,
    clusters: Vec<ClusterConfig>,
    max_retries: u32,
    connect_timeout: Duration,
    socket_timeout: Duration,
    client_intelligence: ClientIntelligence,
    protocol_version: u8,
    force_return_values: bool,
    tcp_no_delay: bool,
    ping_on_start: bool,
    pool: ConnectionPoolConfig,
    balancing_strategy: BalancingStrategy,
    near_caches: Vec<NearCacheConfig>,
}

impl ClientConfig {
    /// Creates a new client configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Initial servers of the default cluster.
    pub fn servers(&self) -> &[ServerAddress] {
        &self.servers
    }

    /// Alternate clusters for cross-site failover.
    pub fn clusters(&self) -> &[ClusterConfig] {
        &self.clusters
    }

    /// Maximum attempts of a single operation across servers.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// TCP connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Time to wait for a response.
    pub fn socket_timeout(&self) -> Duration {
        self.socket_timeout
    }

    /// Client intelligence advertised to servers.
    pub fn client_intelligence(&self) -> ClientIntelligence {
        self.client_intelligence
    }

    /// Protocol version byte.
    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    /// Whether writes ask for the previous value by default.
    pub fn force_return_values(&self) -> bool {
        self.force_return_values
    }

    /// Whether Nagle's algorithm is disabled on connections.
    pub fn tcp_no_delay(&self) -> bool {
        self.tcp_no_delay
    }

    /// Whether the manager pings a server while starting.
    pub fn ping_on_start(&self) -> bool {
        self.ping_on_start
    }

    /// Connection pool settings.
    pub fn pool(&self) -> &ConnectionPoolConfig {
        &self.pool
    }

    /// Balancing strategy for non-key operations.
    pub fn balancing_strategy(&self) -> BalancingStrategy {
        self.balancing_strategy
    }

    /// Near-cache configurations.
    pub fn near_caches(&self) -> &[NearCacheConfig] {
        &self.near_caches
    }

    /// Finds the near-cache configuration for a cache.
    ///
    /// Exact names win over wildcard patterns.
    pub fn find_near_cache(&self, cache_name: &str) -> Option<&NearCacheConfig> {
        self.near_caches
            .iter()
            .find(|c| c.name() == cache_name)
            .or_else(|| self.near_caches.iter().find(|c| c.matches(cache_name)))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: vec![ServerAddress::new("127.0.0.1", 11222)],
            clusters: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            client_intelligence: ClientIntelligence::default(),
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            force_return_values: false,
            tcp_no_delay: true,
            ping_on_start: true,
            pool: ConnectionPoolConfig::default(),
            balancing_strategy: BalancingStrategy::default(),
            near_caches: Vec::new(),
        }
    }
}

/// Builder for `ClientConfig`.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    servers: Vec<String>,
    clusters: Vec<ClusterConfig>,
    max_retries: Option<u32>,
    connect_timeout: Option<Duration>,
    socket_timeout: Option<Duration>,
    client_intelligence: Option<ClientIntelligence>,
    protocol_version: Option<u8>,
    force_return_values: Option<bool>,
    tcp_no_delay: Option<bool>,
    ping_on_start: Option<bool>,
    pool: ConnectionPoolConfigBuilder,
    balancing_strategy: Option<BalancingStrategy>,
    near_caches: Vec<NearCacheConfig>,
}

impl ClientConfigBuilder {
    /// Creates a new client configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a server of the default cluster, as `host[:port]`.
    pub fn add_server(mut self, address: impl Into<String>) -> Self {
        self.servers.push(address.into());
        self
    }

    /// Sets the servers of the default cluster, replacing any previously added.
    pub fn servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers = servers.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an alternate cluster for failover.
    pub fn add_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.clusters.push(cluster);
        self
    }

    /// Sets the maximum attempts per operation.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets the TCP connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the response timeout.
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    /// Sets the client intelligence.
    pub fn client_intelligence(mut self, intelligence: ClientIntelligence) -> Self {
        self.client_intelligence = Some(intelligence);
        self
    }

    /// Sets the protocol version byte.
    pub fn protocol_version(mut self, version: u8) -> Self {
        self.protocol_version = Some(version);
        self
    }

    /// Makes writes return the previous value by default.
    pub fn force_return_values(mut self, force: bool) -> Self {
        self.force_return_values = Some(force);
        self
    }

    /// Enables or disables `TCP_NODELAY`.
    pub fn tcp_no_delay(mut self, enabled: bool) -> Self {
        self.tcp_no_delay = Some(enabled);
        self
    }

    /// Enables or disables the start-up ping.
    pub fn ping_on_start(mut self, enabled: bool) -> Self {
        self.ping_on_start = Some(enabled);
        self
    }

    /// Configures the connection pool using a builder function.
    pub fn pool<F>(mut self, f: F) -> Self
    where
        F: FnOnce(ConnectionPoolConfigBuilder) -> ConnectionPoolConfigBuilder,
    {
        self.pool = f(self.pool);
        self
    }

    /// Sets the balancing strategy.
    pub fn balancing_strategy(mut self, strategy: BalancingStrategy) -> Self {
        self.balancing_strategy = Some(strategy);
        self
    }

    /// Adds a near-cache configuration.
    ///
    /// Multiple configurations can be added, each matching different cache
    /// name patterns.
    pub fn add_near_cache_config(mut self, config: NearCacheConfig) -> Self {
        self.near_caches.push(config);
        self
    }

    /// Builds the client configuration, returning an error if validation fails.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let servers = if self.servers.is_empty() {
            vec![parse_address(DEFAULT_SERVER)?]
        } else {
            self.servers
                .iter()
                .map(|s| parse_address(s))
                .collect::<Result<Vec<_>, _>>()?
        };

        let connect_timeout = self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let socket_timeout = self.socket_timeout.unwrap_or(DEFAULT_SOCKET_TIMEOUT);
        if connect_timeout.is_zero() {
            return Err(ConfigError::new("connect_timeout must be positive"));
        }
        if socket_timeout.is_zero() {
            return Err(ConfigError::new("socket_timeout must be positive"));
        }

        let mut names: Vec<&str> = Vec::with_capacity(self.clusters.len());
        for cluster in &self.clusters {
            if names.contains(&cluster.name()) {
                return Err(ConfigError::new(format!(
                    "duplicate cluster name '{}'",
                    cluster.name()
                )));
            }
            names.push(cluster.name());
        }

        let pool = self.pool.build()?;

        Ok(ClientConfig {
            servers,
            clusters: self.clusters,
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            connect_timeout,
            socket_timeout,
            client_intelligence: self.client_intelligence.unwrap_or_default(),
            protocol_version: self.protocol_version.unwrap_or(DEFAULT_PROTOCOL_VERSION),
            force_return_values: self.force_return_values.unwrap_or(false),
            tcp_no_delay: self.tcp_no_delay.unwrap_or(true),
            ping_on_start: self.ping_on_start.unwrap_or(true),
            pool,
            balancing_strategy: self.balancing_strategy.unwrap_or_default(),
            near_caches: self.near_caches,
        })
    }
}
