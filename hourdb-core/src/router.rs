//! Shard routing
//!
//! A series lands in shard `fnv1a_32(name) % shard_count`. The hash is part
//! of the on-disk format: every reader and writer of a dataset must agree on
//! it, so its name is recorded in each fragment's metadata.

use crate::{HourError, Result, ShardId};
use std::num::NonZeroU32;

/// Name of the hash function, as written to fragment metadata
pub const HASH_NAME: &str = "fnv1a_32";

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// 32-bit FNV-1a over raw bytes
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ b as u32).wrapping_mul(FNV_PRIME)
    })
}

/// Shard for a series name
pub fn route(name: &str, shard_count: NonZeroU32) -> ShardId {
    fnv1a_32(name.as_bytes()) % shard_count.get()
}

/// Router bound to one fragment's shard count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRouter {
    shard_count: NonZeroU32,
}

impl ShardRouter {
    /// Create a router, rejecting a zero shard count
    pub fn new(shard_count: u32) -> Result<Self> {
        NonZeroU32::new(shard_count)
            .map(|shard_count| Self { shard_count })
            .ok_or_else(|| HourError::Config("shard_count must be at least 1".into()))
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count.get()
    }

    /// Shard for a series name
    pub fn route(&self, name: &str) -> ShardId {
        route(name, self.shard_count)
    }

    /// All shard ids in ascending order
    pub fn shards(&self) -> std::ops::Range<ShardId> {
        0..self.shard_count.get()
    }
}
