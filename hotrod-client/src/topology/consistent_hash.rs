//! Segment based consistent hash built from a topology frame.

use std::fmt;
use std::sync::Arc;

use hotrod_core::hash::{segment_size, MAX_SEGMENTS};
use hotrod_core::protocol::TopologyUpdate;
use hotrod_core::{HashFunction, HashFunctionRegistry, ServerAddress};

/// Owner table of every segment for one topology.
///
/// Built once per topology and never mutated: a topology change produces a
/// whole new instance. `owners[s][0]` is the primary owner of segment `s`.
#[derive(Clone)]
pub struct SegmentConsistentHash {
    num_segments: i32,
    hash_function: Arc<dyn HashFunction>,
    owners: Vec<Vec<ServerAddress>>,
}

impl fmt::Debug for SegmentConsistentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentConsistentHash")
            .field("num_segments", &self.num_segments)
            .field("hash_function_version", &self.hash_function.version())
            .finish()
    }
}

impl SegmentConsistentHash {
    /// Creates a hash from an explicit owner table.
    ///
    /// Returns `None` when the table is empty or any segment has no owner.
    pub fn new(
        hash_function: Arc<dyn HashFunction>,
        owners: Vec<Vec<ServerAddress>>,
    ) -> Option<Self> {
        if owners.is_empty() || owners.iter().any(|o| o.is_empty()) {
            return None;
        }
        Some(Self {
            num_segments: owners.len() as i32,
            hash_function,
            owners,
        })
    }

    /// Derives the owner table from the hash ids announced in a topology frame.
    ///
    /// Servers sit on a wheel at `hash_id & i32::MAX`. Segment `s` starts at
    /// `s * segment_size`; its owners are the first `num_owners` distinct
    /// servers met walking the wheel clockwise from there.
    ///
    /// Returns `None` when the frame disables hashing, the hash function
    /// version is unknown, no server was announced, or the segment count
    /// exceeds [`MAX_SEGMENTS`].
    pub fn from_topology(update: &TopologyUpdate, registry: &HashFunctionRegistry) -> Option<Self> {
        if !update.has_consistent_hash()
            || update.servers.is_empty()
            || update.num_segments > MAX_SEGMENTS
        {
            return None;
        }
        let hash_function = registry.get(update.hash_function_version)?;

        let mut wheel: Vec<(i64, &ServerAddress)> = update
            .servers
            .iter()
            .map(|s| (i64::from(s.hash_id & i32::MAX), &s.address))
            .collect();
        wheel.sort();

        let distinct = update.addresses().len();
        let num_owners = usize::from(update.num_owners).clamp(1, distinct);
        let size = segment_size(update.num_segments);

        let owners = (0..update.num_segments)
            .map(|segment| {
                let anchor = i64::from(segment) * size;
                let start = wheel.partition_point(|(pos, _)| *pos < anchor);
                let mut segment_owners: Vec<ServerAddress> = Vec::with_capacity(num_owners);
                for offset in 0..wheel.len() {
                    let (_, address) = wheel[(start + offset) % wheel.len()];
                    if !segment_owners.contains(address) {
                        segment_owners.push(address.clone());
                        if segment_owners.len() == num_owners {
                            break;
                        }
                    }
                }
                segment_owners
            })
            .collect();

        Self::new(hash_function, owners)
    }

    /// Number of segments.
    pub fn num_segments(&self) -> i32 {
        self.num_segments
    }

    /// Version of the hash function in use.
    pub fn hash_function_version(&self) -> u8 {
        self.hash_function.version()
    }

    /// Segment a key belongs to.
    pub fn segment_of(&self, key: &[u8]) -> i32 {
        let hash = self.hash_function.hash(key);
        self.hash_function.segment_for_key(hash, self.num_segments)
    }

    /// Owners of a segment, primary first.
    pub fn segment_owners(&self, segment: i32) -> &[ServerAddress] {
        usize::try_from(segment)
            .ok()
            .and_then(|s| self.owners.get(s))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Owners of the segment a key belongs to, primary first.
    pub fn owners_of(&self, key: &[u8]) -> &[ServerAddress] {
        self.segment_owners(self.segment_of(key))
    }

    /// Primary owner of a key.
    pub fn primary_owner(&self, key: &[u8]) -> Option<&ServerAddress> {
        self.owners_of(key).first()
    }

    /// The full owner table.
    pub fn owners(&self) -> &[Vec<ServerAddress>] {
        &self.owners
    }
}
