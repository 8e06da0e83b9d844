//! Topology update frames embedded in responses.

use bytes::BufMut;

use super::wire::{DecodeResult, WireReader, WireWrite};
use crate::address::ServerAddress;

/// One cluster member as announced in a topology frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHash {
    /// Where the member accepts Hot Rod connections.
    pub address: ServerAddress,
    /// Position of the member on the hash wheel.
    pub hash_id: i32,
}

/// A decoded topology frame.
///
/// Wire layout: `topologyId (vint), numOwners (u16), hashFunctionVersion (u8),
/// numSegments (vint), clusterSize (vint)` followed by `clusterSize` entries of
/// `host (string), port (u16), hashId (i32)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyUpdate {
    /// Id of this membership snapshot.
    pub topology_id: i32,
    /// Replicas per segment.
    pub num_owners: u16,
    /// Hash function to use, `0` when no consistent hash is usable.
    pub hash_function_version: u8,
    /// Number of segments in the key space.
    pub num_segments: i32,
    /// Every member of the cluster.
    pub servers: Vec<ServerHash>,
}

impl TopologyUpdate {
    /// Whether clients may route by segment with this topology.
    pub fn has_consistent_hash(&self) -> bool {
        self.hash_function_version > 0 && self.num_segments > 0
    }

    /// Distinct server addresses in announcement order.
    pub fn addresses(&self) -> Vec<ServerAddress> {
        let mut out: Vec<ServerAddress> = Vec::with_capacity(self.servers.len());
        for server in &self.servers {
            if !out.contains(&server.address) {
                out.push(server.address.clone());
            }
        }
        out
    }

    /// Decodes a frame; the reader is left just past it.
    pub fn read_from(reader: &mut WireReader<'_>) -> DecodeResult<Self> {
        let topology_id = reader.read_vint()?;
        let num_owners = reader.read_u16()?;
        let hash_function_version = reader.read_u8()?;
        let num_segments = reader.read_vint()?;
        let cluster_size = reader.read_vint()?;
        if cluster_size < 0 {
            return Err(super::wire::DecodeError::Malformed(format!(
                "negative cluster size {}",
                cluster_size
            )));
        }

        let mut servers = Vec::with_capacity((cluster_size as usize).min(1024));
        for _ in 0..cluster_size {
            let host = reader.read_string()?;
            let port = reader.read_u16()?;
            let hash_id = reader.read_i32()?;
            servers.push(ServerHash {
                address: ServerAddress::new(host, port),
                hash_id,
            });
        }

        Ok(Self {
            topology_id,
            num_owners,
            hash_function_version,
            num_segments,
            servers,
        })
    }

    /// Encodes the frame.
    pub fn write_to<B: BufMut>(&self, dst: &mut B) {
        dst.put_vint(self.topology_id);
        dst.put_u16(self.num_owners);
        dst.put_u8(self.hash_function_version);
        dst.put_vint(self.num_segments);
        dst.put_vint(self.servers.len() as i32);
        for server in &self.servers {
            dst.put_string(server.address.host());
            dst.put_u16(server.address.port());
            dst.put_i32(server.hash_id);
        }
    }
}
