//! Cluster topology tracking and key ownership.

mod consistent_hash;
mod tracker;

pub use consistent_hash::SegmentConsistentHash;
pub use tracker::{CacheInfo, TopologyChange, TopologyTracker};

use std::sync::atomic::{AtomicI32, Ordering};

use hotrod_core::protocol::constants::{
    CLIENT_INTELLIGENCE_BASIC, CLIENT_INTELLIGENCE_HASH_DISTRIBUTION_AWARE,
    CLIENT_INTELLIGENCE_TOPOLOGY_AWARE,
};
use hotrod_core::ServerAddress;

/// How much of the cluster layout the client asks the server to share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientIntelligence {
    /// No topology information; the initial servers are used as given.
    Basic,
    /// Server list updates, without segment ownership.
    TopologyAware,
    /// Server list and segment ownership, enabling key routing.
    #[default]
    HashDistributionAware,
}

impl ClientIntelligence {
    /// The byte sent in every request header.
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Basic => CLIENT_INTELLIGENCE_BASIC,
            Self::TopologyAware => CLIENT_INTELLIGENCE_TOPOLOGY_AWARE,
            Self::HashDistributionAware => CLIENT_INTELLIGENCE_HASH_DISTRIBUTION_AWARE,
        }
    }

    /// Parses a header byte.
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            CLIENT_INTELLIGENCE_BASIC => Some(Self::Basic),
            CLIENT_INTELLIGENCE_TOPOLOGY_AWARE => Some(Self::TopologyAware),
            CLIENT_INTELLIGENCE_HASH_DISTRIBUTION_AWARE => Some(Self::HashDistributionAware),
            _ => None,
        }
    }
}

/// Topology id paired with the intelligence it was negotiated under.
///
/// Immutable: a newer topology replaces the whole value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTopology {
    topology_id: i32,
    intelligence: ClientIntelligence,
}

impl ClientTopology {
    /// Creates a topology value.
    pub fn new(topology_id: i32, intelligence: ClientIntelligence) -> Self {
        Self {
            topology_id,
            intelligence,
        }
    }

    /// The topology id sent in request headers.
    pub fn topology_id(&self) -> i32 {
        self.topology_id
    }

    /// The intelligence level sent in request headers.
    pub fn intelligence(&self) -> ClientIntelligence {
        self.intelligence
    }
}

/// One cluster the client may talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    name: String,
    initial_servers: Vec<ServerAddress>,
    client_intelligence: ClientIntelligence,
    topology_age: i32,
}

impl ClusterInfo {
    /// Creates a cluster description at topology age zero.
    pub fn new(
        name: impl Into<String>,
        initial_servers: Vec<ServerAddress>,
        client_intelligence: ClientIntelligence,
    ) -> Self {
        Self {
            name: name.into(),
            initial_servers,
            client_intelligence,
            topology_age: 0,
        }
    }

    /// Cluster name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Servers used until the cluster reports its own membership.
    pub fn initial_servers(&self) -> &[ServerAddress] {
        &self.initial_servers
    }

    /// Intelligence used for caches of this cluster.
    pub fn client_intelligence(&self) -> ClientIntelligence {
        self.client_intelligence
    }

    /// Age at which this cluster became active.
    pub fn topology_age(&self) -> i32 {
        self.topology_age
    }

    pub(crate) fn with_topology_age(&self, topology_age: i32) -> Self {
        Self {
            topology_age,
            ..self.clone()
        }
    }
}

/// Counter bumped on every cluster switch.
///
/// Owned by a single client so independent clients in one process never
/// observe each other's switches.
#[derive(Debug, Default)]
pub struct TopologyAge(AtomicI32);

impl TopologyAge {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current age.
    pub fn get(&self) -> i32 {
        self.0.load(Ordering::Acquire)
    }

    /// Bumps the age and returns the new value.
    pub fn increment(&self) -> i32 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intelligence_bytes() {
        for intelligence in [
            ClientIntelligence::Basic,
            ClientIntelligence::TopologyAware,
            ClientIntelligence::HashDistributionAware,
        ] {
            assert_eq!(ClientIntelligence::from_byte(intelligence.to_byte()), Some(intelligence));
        }
        assert_eq!(ClientIntelligence::Basic.to_byte(), 0x01);
        assert_eq!(ClientIntelligence::HashDistributionAware.to_byte(), 0x03);
        assert_eq!(ClientIntelligence::from_byte(0x07), None);
        assert_eq!(ClientIntelligence::default(), ClientIntelligence::HashDistributionAware);
    }

    #[test]
    fn test_topology_age() {
        let age = TopologyAge::new();
        assert_eq!(age.get(), 0);
        assert_eq!(age.increment(), 1);
        assert_eq!(age.increment(), 2);
        assert_eq!(age.get(), 2);
    }

    #[test]
    fn test_independent_ages() {
        let a = TopologyAge::new();
        let b = TopologyAge::new();
        a.increment();
        assert_eq!(b.get(), 0);
    }

    #[test]
    fn test_cluster_info_age() {
        let cluster = ClusterInfo::new(
            "site-a",
            vec![ServerAddress::new("a", 11222)],
            ClientIntelligence::Basic,
        );
        let aged = cluster.with_topology_age(3);
        assert_eq!(aged.topology_age(), 3);
        assert_eq!(aged.name(), "site-a");
        assert_eq!(cluster.topology_age(), 0);
    }
}
