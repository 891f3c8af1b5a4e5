//! Time series store - the public facade
//!
//! A [`Store`] is an explicit handle on one dataset directory. It routes
//! each series to its month's fragment and shard, encodes vectors, applies
//! the pruning policies, and caches open fragments until it is closed.

mod config;
mod engine;
mod namespace;
mod scan;

pub use config::StoreConfig;
pub use engine::{Store, StoreBatch};
pub use namespace::{item_name, namespace_of, namespace_range, HourlyBatch};
pub use scan::{ItemScan, ScanEntry};

/// Result of a `put`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Row stored, compressed or raw
    Written { compressed: bool },
    /// Total below the write pruning threshold; nothing stored
    Skipped,
}

impl PutOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, PutOutcome::Written { .. })
    }
}
