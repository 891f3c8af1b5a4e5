//! HourDB Core - Sharded Storage for Hourly Count Vectors
//!
//! Persists one vector per item per calendar month, one element per hour
//! (Wikipedia article hits, n-gram counts, ...). Optimized for:
//! - Incremental monthly appends without rewriting the dataset
//! - Item-major iteration over data that arrives time-major
//! - Many worker processes sharing a directory with no server
//! - Compact storage via compression and pruning of negligible series
//!
//! # Architecture
//!
//! - **Codec**: fixed-width little-endian element dump, zlib-compressed
//!   when the series total is small
//! - **Fragment**: one SQLite file per month holding N shard tables
//!   plus a metadata table
//! - **Router**: FNV-1a 32-bit hash of the series name, modulo shard count
//! - **Directory**: month to file path mapping and fragment enumeration
//! - **Store**: the public facade tying the above together

pub mod codec;
pub mod directory;
pub mod fragment;
pub mod router;
pub mod store;

mod error;
mod types;

pub use directory::Month;
pub use error::{HourError, Result};
pub use store::{HourlyBatch, ItemScan, PutOutcome, ScanEntry, Store, StoreBatch, StoreConfig};
pub use types::*;

/// HourDB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Series with a total below this are stored compressed
    pub const COMPRESSION_THRESHOLD: f64 = 5.0;

    /// zlib compression level (0-9)
    pub const COMPRESSION_LEVEL: u32 = 9;

    /// Lock wait before a write gives up with `Busy` (5s)
    pub const BUSY_TIMEOUT_MS: u64 = 5_000;

    /// SQLite page size for new fragments (64KB)
    pub const PAGE_SIZE: u32 = 64 * 1024;

    /// SQLite page cache per connection (64MB)
    pub const CACHE_SIZE_KIB: u32 = 64 * 1024;

    /// Rows fetched per round trip during shard scans
    pub const SCAN_BATCH_SIZE: usize = 256;

    /// Separator between namespace and item in series names
    pub const NAMESPACE_DELIMITER: char = '/';
}
