//! Per-cache topology state, replaced wholesale under compare-and-swap.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hotrod_core::protocol::constants::{DEFAULT_CLUSTER_TOPOLOGY, SWITCH_CLUSTER_TOPOLOGY};
use hotrod_core::protocol::TopologyUpdate;
use hotrod_core::{HashFunctionRegistry, HotRodError, Result, ServerAddress};

use super::{ClientIntelligence, ClientTopology, ClusterInfo, SegmentConsistentHash, TopologyAge};
use crate::config::BalancingStrategy;
use crate::connection::{create_balancer, FailoverRequestBalancingStrategy};

/// Routing snapshot of one cache.
///
/// Never mutated after construction; the tracker swaps in a new instance
/// whenever the topology changes.
#[derive(Debug, Clone)]
pub struct CacheInfo {
    cache_name: String,
    servers: Vec<ServerAddress>,
    consistent_hash: Option<Arc<SegmentConsistentHash>>,
    topology: ClientTopology,
    topology_age: i32,
    balancer: Arc<dyn FailoverRequestBalancingStrategy>,
}

impl CacheInfo {
    fn initial(
        cache_name: &str,
        cluster: &ClusterInfo,
        topology_id: i32,
        balancer: Arc<dyn FailoverRequestBalancingStrategy>,
    ) -> Self {
        balancer.set_servers(cluster.initial_servers());
        Self {
            cache_name: cache_name.to_string(),
            servers: cluster.initial_servers().to_vec(),
            consistent_hash: None,
            topology: ClientTopology::new(topology_id, cluster.client_intelligence()),
            topology_age: cluster.topology_age(),
            balancer,
        }
    }

    /// Name of the cache.
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Servers currently believed to host the cache.
    pub fn servers(&self) -> &[ServerAddress] {
        &self.servers
    }

    /// Segment owners, once the cluster announced a usable hash.
    pub fn consistent_hash(&self) -> Option<&Arc<SegmentConsistentHash>> {
        self.consistent_hash.as_ref()
    }

    /// Topology id and intelligence sent with requests for this cache.
    pub fn topology(&self) -> ClientTopology {
        self.topology
    }

    /// Shorthand for `topology().topology_id()`.
    pub fn topology_id(&self) -> i32 {
        self.topology.topology_id()
    }

    /// Topology age this snapshot belongs to.
    pub fn topology_age(&self) -> i32 {
        self.topology_age
    }

    /// Balancer used for requests not routed by key.
    pub fn balancer(&self) -> &Arc<dyn FailoverRequestBalancingStrategy> {
        &self.balancer
    }
}

/// Membership delta produced by an applied topology update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyChange {
    /// Servers that joined.
    pub added: Vec<ServerAddress>,
    /// Servers that left.
    pub removed: Vec<ServerAddress>,
}

/// Tracks the topology of every cache a client has touched.
///
/// Readers always see a complete [`CacheInfo`]; writers replace it only if
/// the snapshot they started from is still current.
#[derive(Debug)]
pub struct TopologyTracker {
    caches: DashMap<String, Arc<CacheInfo>>,
    clusters: Vec<ClusterInfo>,
    active: RwLock<ClusterInfo>,
    age: TopologyAge,
    registry: HashFunctionRegistry,
    balancing: BalancingStrategy,
}

impl TopologyTracker {
    /// Creates a tracker over `clusters`; the first one is the default.
    pub fn new(
        clusters: Vec<ClusterInfo>,
        balancing: BalancingStrategy,
        registry: HashFunctionRegistry,
    ) -> Result<Self> {
        let default = clusters
            .first()
            .cloned()
            .ok_or_else(|| HotRodError::Configuration("no cluster configured".to_string()))?;
        Ok(Self {
            caches: DashMap::new(),
            clusters,
            active: RwLock::new(default),
            age: TopologyAge::new(),
            registry,
            balancing,
        })
    }

    /// Current topology age.
    pub fn topology_age(&self) -> i32 {
        self.age.get()
    }

    /// The cluster requests currently go to.
    pub fn active_cluster(&self) -> ClusterInfo {
        match self.active.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Every configured cluster, default first.
    pub fn clusters(&self) -> &[ClusterInfo] {
        &self.clusters
    }

    /// Names of the caches tracked so far.
    pub fn cache_names(&self) -> Vec<String> {
        self.caches.iter().map(|e| e.key().clone()).collect()
    }

    /// Current snapshot of a cache, if it was ever touched.
    pub fn cache_info(&self, cache_name: &str) -> Option<Arc<CacheInfo>> {
        self.caches.get(cache_name).map(|e| Arc::clone(e.value()))
    }

    /// Returns the snapshot of a cache, seeding it from the active cluster
    /// on first use. Concurrent callers all get the first inserted value.
    pub fn get_or_create_cache_info(&self, cache_name: &str) -> Arc<CacheInfo> {
        let current_age = self.age.get();
        if let Some(info) = self.caches.get(cache_name) {
            if info.topology_age == current_age {
                return Arc::clone(info.value());
            }
        }

        let cluster = self.active_cluster();
        match self.caches.entry(cache_name.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().topology_age == cluster.topology_age() {
                    Arc::clone(entry.get())
                } else {
                    // Created against a cluster that has since been abandoned.
                    let balancer = Arc::clone(&entry.get().balancer);
                    let info = Arc::new(CacheInfo::initial(
                        cache_name,
                        &cluster,
                        SWITCH_CLUSTER_TOPOLOGY,
                        balancer,
                    ));
                    entry.insert(Arc::clone(&info));
                    info
                }
            }
            Entry::Vacant(entry) => {
                let balancer = create_balancer(self.balancing, cluster.initial_servers());
                let info = Arc::new(CacheInfo::initial(
                    cache_name,
                    &cluster,
                    DEFAULT_CLUSTER_TOPOLOGY,
                    balancer,
                ));
                entry.insert(Arc::clone(&info));
                info
            }
        }
    }

    /// Installs `new_info` only if `old_info` is still the current snapshot.
    ///
    /// Returns `false` and leaves the cache untouched when another update
    /// got there first. The balancer is updated under the same entry lock,
    /// so it always holds the servers of the installed snapshot.
    pub fn update_cache_info(
        &self,
        cache_name: &str,
        old_info: &Arc<CacheInfo>,
        new_info: CacheInfo,
    ) -> bool {
        let swapped = match self.caches.get_mut(cache_name) {
            Some(mut current) if Arc::ptr_eq(current.value(), old_info) => {
                new_info.balancer.set_servers(&new_info.servers);
                *current = Arc::new(new_info);
                true
            }
            _ => false,
        };
        if !swapped {
            tracing::debug!(cache = cache_name, "discarding stale cache info update");
        }
        swapped
    }

    /// Applies a topology frame received on a request sent at `request_age`.
    ///
    /// Frames from an abandoned cluster, frames that are not newer than the
    /// current topology and frames that lose the swap are ignored.
    pub fn update_topology(
        &self,
        cache_name: &str,
        update: &TopologyUpdate,
        request_age: i32,
    ) -> Option<TopologyChange> {
        let current_age = self.age.get();
        if request_age != current_age {
            tracing::debug!(
                cache = cache_name,
                request_age,
                current_age,
                "ignoring topology from previous cluster"
            );
            return None;
        }

        let current = self.get_or_create_cache_info(cache_name);
        if update.topology_id <= current.topology_id() {
            tracing::trace!(
                cache = cache_name,
                received = update.topology_id,
                current = current.topology_id(),
                "ignoring outdated topology"
            );
            return None;
        }

        let servers = update.addresses();
        if servers.is_empty() {
            tracing::warn!(cache = cache_name, "ignoring topology without servers");
            return None;
        }

        let intelligence = current.topology.intelligence();
        let consistent_hash = if intelligence == ClientIntelligence::HashDistributionAware {
            SegmentConsistentHash::from_topology(update, &self.registry).map(Arc::new)
        } else {
            None
        };
        if consistent_hash.is_none() && intelligence == ClientIntelligence::HashDistributionAware {
            tracing::warn!(
                cache = cache_name,
                hash_function_version = update.hash_function_version,
                num_segments = update.num_segments,
                "no usable consistent hash, falling back to balancer routing"
            );
        }

        let change = TopologyChange {
            added: servers
                .iter()
                .filter(|s| !current.servers.contains(s))
                .cloned()
                .collect(),
            removed: current
                .servers
                .iter()
                .filter(|s| !servers.contains(s))
                .cloned()
                .collect(),
        };

        let new_info = CacheInfo {
            cache_name: cache_name.to_string(),
            servers,
            consistent_hash,
            topology: ClientTopology::new(update.topology_id, intelligence),
            topology_age: current.topology_age,
            balancer: Arc::clone(&current.balancer),
        };

        if self.update_cache_info(cache_name, &current, new_info) {
            tracing::info!(
                cache = cache_name,
                topology_id = update.topology_id,
                added = change.added.len(),
                removed = change.removed.len(),
                "topology updated"
            );
            Some(change)
        } else {
            None
        }
    }

    /// Makes the named cluster active and resets every cache to its
    /// initial servers.
    ///
    /// Bumps the topology age, so frames still in flight from the previous
    /// cluster are ignored when they arrive.
    pub fn switch_cluster(&self, cluster_name: &str) -> Result<ClusterInfo> {
        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name() == cluster_name)
            .ok_or_else(|| {
                HotRodError::Configuration(format!("unknown cluster '{}'", cluster_name))
            })?;

        let activated = {
            let mut active = match self.active.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let activated = cluster.with_topology_age(self.age.increment());
            *active = activated.clone();
            activated
        };

        for mut entry in self.caches.iter_mut() {
            let balancer = Arc::clone(&entry.value().balancer);
            let info =
                CacheInfo::initial(entry.key(), &activated, SWITCH_CLUSTER_TOPOLOGY, balancer);
            *entry.value_mut() = Arc::new(info);
        }

        tracing::info!(
            cluster = activated.name(),
            topology_age = activated.topology_age(),
            "switched cluster"
        );
        Ok(activated)
    }

    /// Switches back to the default cluster.
    pub fn switch_to_default_cluster(&self) -> Result<ClusterInfo> {
        let name = self.clusters[0].name().to_string();
        self.switch_cluster(&name)
    }

    /// The cluster to fail over to after the active one, if any.
    pub fn next_cluster(&self) -> Option<ClusterInfo> {
        if self.clusters.len() < 2 {
            return None;
        }
        let active = self.active_cluster();
        let index = self
            .clusters
            .iter()
            .position(|c| c.name() == active.name())
            .unwrap_or(0);
        Some(self.clusters[(index + 1) % self.clusters.len()].clone())
    }

    /// Drops one cache back to the active cluster's initial servers.
    pub fn reset(&self, cache_name: &str) {
        let cluster = self.active_cluster();
        if let Some(mut entry) = self.caches.get_mut(cache_name) {
            let balancer = Arc::clone(&entry.value().balancer);
            let info = CacheInfo::initial(cache_name, &cluster, DEFAULT_CLUSTER_TOPOLOGY, balancer);
            *entry.value_mut() = Arc::new(info);
            tracing::info!(cache = cache_name, "reset to initial servers");
        }
    }

    /// Whether any tracked cache still lists `server`.
    pub fn is_known_server(&self, server: &ServerAddress) -> bool {
        self.caches.iter().any(|e| e.value().servers.contains(server))
    }

    /// Picks the server for an attempt, skipping `failed` ones.
    ///
    /// Keyed requests go to the first live owner of the key's segment when a
    /// consistent hash is known; everything else uses the balancer.
    pub fn route(
        &self,
        cache_name: &str,
        key: Option<&[u8]>,
        failed: &HashSet<ServerAddress>,
    ) -> Option<ServerAddress> {
        let info = self.get_or_create_cache_info(cache_name);
        if let (Some(key), Some(hash)) = (key, info.consistent_hash()) {
            if let Some(owner) = hash.owners_of(key).iter().find(|s| !failed.contains(*s)) {
                return Some(owner.clone());
            }
        }
        info.balancer.next_server(failed)
    }
}
