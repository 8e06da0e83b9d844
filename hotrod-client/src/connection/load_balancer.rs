//! Load balancing strategies for operations that are not routed by key.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use hotrod_core::ServerAddress;
use rand::seq::SliceRandom;

use crate::config::BalancingStrategy;

/// Picks servers for requests that any member can answer.
///
/// The topology tracker republishes the server list on every topology
/// change; `next_server` skips servers that already failed for the
/// operation being retried.
pub trait FailoverRequestBalancingStrategy: Send + Sync {
    /// Replaces the known servers.
    fn set_servers(&self, servers: &[ServerAddress]);

    /// Picks a server not contained in `failed`.
    ///
    /// Returns `None` if every known server has failed.
    fn next_server(&self, failed: &HashSet<ServerAddress>) -> Option<ServerAddress>;

    /// The servers currently known.
    fn servers(&self) -> Vec<ServerAddress>;
}

impl std::fmt::Debug for dyn FailoverRequestBalancingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverRequestBalancingStrategy")
            .field("servers", &self.servers())
            .finish()
    }
}

fn read_servers(servers: &RwLock<Vec<ServerAddress>>) -> Vec<ServerAddress> {
    servers.read().map(|s| s.clone()).unwrap_or_default()
}

fn write_servers(target: &RwLock<Vec<ServerAddress>>, servers: &[ServerAddress]) {
    if let Ok(mut guard) = target.write() {
        *guard = servers.to_vec();
    }
}

/// Cycles through servers in order.
#[derive(Debug, Default)]
pub struct RoundRobinBalancingStrategy {
    servers: RwLock<Vec<ServerAddress>>,
    index: AtomicUsize,
}

impl RoundRobinBalancingStrategy {
    /// Creates a new round-robin strategy.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FailoverRequestBalancingStrategy for RoundRobinBalancingStrategy {
    fn set_servers(&self, servers: &[ServerAddress]) {
        write_servers(&self.servers, servers);
    }

    fn next_server(&self, failed: &HashSet<ServerAddress>) -> Option<ServerAddress> {
        let servers = read_servers(&self.servers);
        if servers.is_empty() {
            return None;
        }
        let start = self.index.fetch_add(1, Ordering::Relaxed);
        (0..servers.len())
            .map(|offset| &servers[(start + offset) % servers.len()])
            .find(|s| !failed.contains(*s))
            .cloned()
    }

    fn servers(&self) -> Vec<ServerAddress> {
        read_servers(&self.servers)
    }
}

/// Picks a random server.
#[derive(Debug, Default)]
pub struct RandomBalancingStrategy {
    servers: RwLock<Vec<ServerAddress>>,
}

impl RandomBalancingStrategy {
    /// Creates a new random strategy.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FailoverRequestBalancingStrategy for RandomBalancingStrategy {
    fn set_servers(&self, servers: &[ServerAddress]) {
        write_servers(&self.servers, servers);
    }

    fn next_server(&self, failed: &HashSet<ServerAddress>) -> Option<ServerAddress> {
        let candidates: Vec<ServerAddress> = read_servers(&self.servers)
            .into_iter()
            .filter(|s| !failed.contains(s))
            .collect();
        candidates.choose(&mut rand::thread_rng()).cloned()
    }

    fn servers(&self) -> Vec<ServerAddress> {
        read_servers(&self.servers)
    }
}

/// Creates a strategy of the configured kind, seeded with `servers`.
pub fn create_balancer(
    kind: BalancingStrategy,
    servers: &[ServerAddress],
) -> Arc<dyn FailoverRequestBalancingStrategy> {
    let balancer: Arc<dyn FailoverRequestBalancingStrategy> = match kind {
        BalancingStrategy::RoundRobin => Arc::new(RoundRobinBalancingStrategy::new()),
        BalancingStrategy::Random => Arc::new(RandomBalancingStrategy::new()),
    };
    balancer.set_servers(servers);
    balancer
}
