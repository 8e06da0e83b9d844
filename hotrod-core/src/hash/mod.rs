//! Hash functions selected by the `hashFunctionVersion` of a topology frame.
//!
//! Each version maps to a [`HashFunction`] strategy. Keys hash to a signed
//! 32-bit value; the non-negative part of that value is split into
//! `numSegments` equally sized ranges.

mod murmur;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use murmur::{murmur_hash2, murmur_hash3_x86_32};

/// Seed used by the version 2 hash.
pub const MURMUR3_SEED: u32 = 9001;

/// Seed used by the version 1 hash.
pub const MURMUR2_SEED: u32 = 9001;

/// Largest segment count a client builds an owner table for.
///
/// Clusters use a few hundred segments; a frame announcing more than this
/// is treated as corrupt.
pub const MAX_SEGMENTS: i32 = 1 << 16;

/// Width of one segment when the positive hash space is cut into `num_segments`.
pub fn segment_size(num_segments: i32) -> i64 {
    let n = i64::from(num_segments.max(1));
    let space = 1i64 << 31;
    (space + n - 1) / n
}

/// A key hashing strategy.
pub trait HashFunction: Send + Sync + fmt::Debug {
    /// Version number announced by the server.
    fn version(&self) -> u8;

    /// Hashes key bytes.
    fn hash(&self, key: &[u8]) -> i32;

    /// Maps a key hash to its segment.
    fn segment_for_key(&self, hash: i32, num_segments: i32) -> i32 {
        let normalized = i64::from(hash & i32::MAX);
        let segment = normalized / segment_size(num_segments);
        segment.min(i64::from(num_segments.max(1)) - 1) as i32
    }
}

/// Version 1: MurmurHash2.
#[derive(Debug, Default, Clone, Copy)]
pub struct MurmurHash2Function;

impl HashFunction for MurmurHash2Function {
    fn version(&self) -> u8 {
        1
    }

    fn hash(&self, key: &[u8]) -> i32 {
        murmur_hash2(key, MURMUR2_SEED)
    }
}

/// Version 2: MurmurHash3 x86 32-bit.
#[derive(Debug, Default, Clone, Copy)]
pub struct MurmurHash3Function;

impl HashFunction for MurmurHash3Function {
    fn version(&self) -> u8 {
        2
    }

    fn hash(&self, key: &[u8]) -> i32 {
        murmur_hash3_x86_32(key, MURMUR3_SEED)
    }
}

/// Resolves hash function versions to strategies.
#[derive(Debug, Clone)]
pub struct HashFunctionRegistry {
    functions: HashMap<u8, Arc<dyn HashFunction>>,
}

impl HashFunctionRegistry {
    /// Registry with the built-in versions 1 and 2.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(MurmurHash2Function));
        registry.register(Arc::new(MurmurHash3Function));
        registry
    }

    /// Registry without any function.
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Adds or replaces the function for its version.
    pub fn register(&mut self, function: Arc<dyn HashFunction>) {
        self.functions.insert(function.version(), function);
    }

    /// Looks up a version. Version 0 never resolves.
    pub fn get(&self, version: u8) -> Option<Arc<dyn HashFunction>> {
        if version == 0 {
            return None;
        }
        self.functions.get(&version).cloned()
    }
}

impl Default for HashFunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
