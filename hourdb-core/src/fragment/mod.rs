//! Fragment files - one SQLite database per calendar month
//!
//! A fragment holds `shard_count` tables named `data0..data{k-1}` plus a
//! `metadata` key/value table recording the layout it was created with.
//! Locking across processes is left entirely to SQLite: one writer per
//! file, any number of readers, and a bounded busy timeout.

mod batch;
mod file;
mod scan;
mod schema;

pub use batch::FragmentBatch;
pub use file::Fragment;
pub use scan::ShardScan;
pub use schema::SCHEMA_VERSION;

use crate::codec::Encoded;
use crate::config::{BUSY_TIMEOUT_MS, CACHE_SIZE_KIB, PAGE_SIZE, SCAN_BATCH_SIZE};
use crate::{HourError, Result, ShardId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Shape of a fragment, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentLayout {
    pub shard_count: u32,
    pub hours_in_month: u32,
}

impl FragmentLayout {
    pub fn new(shard_count: u32, hours_in_month: u32) -> Result<Self> {
        if shard_count == 0 {
            return Err(HourError::Config("shard_count must be at least 1".into()));
        }
        if hours_in_month == 0 {
            return Err(HourError::Config("hours_in_month must be at least 1".into()));
        }
        Ok(Self {
            shard_count,
            hours_in_month,
        })
    }

    pub(crate) fn check_shard(&self, shard: ShardId) -> Result<()> {
        if shard >= self.shard_count {
            return Err(HourError::Config(format!(
                "shard {} out of range for {} shards",
                shard, self.shard_count
            )));
        }
        Ok(())
    }
}

/// Optional expectations checked when opening an existing fragment read-only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayoutCheck {
    pub shard_count: Option<u32>,
    pub hours_in_month: Option<u32>,
}

impl LayoutCheck {
    /// Require exactly `layout`
    pub fn exact(layout: FragmentLayout) -> Self {
        Self {
            shard_count: Some(layout.shard_count),
            hours_in_month: Some(layout.hours_in_month),
        }
    }
}

/// SQLite rollback journal mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Wal,
}

impl JournalMode {
    pub fn as_str(self) -> &'static str {
        match self {
            JournalMode::Delete => "delete",
            JournalMode::Truncate => "truncate",
            JournalMode::Persist => "persist",
            JournalMode::Wal => "wal",
        }
    }
}

impl Default for JournalMode {
    fn default() -> Self {
        JournalMode::Persist
    }
}

/// SQLite `synchronous` setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Off,
    Normal,
    Full,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::Off => "OFF",
            SyncMode::Normal => "NORMAL",
            SyncMode::Full => "FULL",
        }
    }
}

impl Default for SyncMode {
    fn default() -> Self {
        SyncMode::Full
    }
}

/// Connection settings for a fragment
#[derive(Debug, Clone)]
pub struct FragmentOptions {
    /// How long a locked operation waits before failing with `Busy`
    pub busy_timeout: Duration,
    /// Page size, applied only when the file is created
    pub page_size: u32,
    /// Page cache per connection
    pub cache_size_kib: u32,
    pub journal_mode: JournalMode,
    pub synchronous: SyncMode,
    /// Rows fetched per query during scans
    pub scan_batch_size: usize,
}

impl Default for FragmentOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(BUSY_TIMEOUT_MS),
            page_size: PAGE_SIZE,
            cache_size_kib: CACHE_SIZE_KIB,
            journal_mode: JournalMode::default(),
            synchronous: SyncMode::default(),
            scan_batch_size: SCAN_BATCH_SIZE,
        }
    }
}

/// A stored row, still encoded
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub name: String,
    /// One-character type code
    pub dtype: String,
    pub total: f64,
    pub compressed: bool,
    pub data: Vec<u8>,
}

impl Row {
    /// Build a row from codec output
    pub fn from_encoded(name: impl Into<String>, encoded: Encoded) -> Self {
        Self {
            name: name.into(),
            dtype: encoded.dtype.code().to_string(),
            total: encoded.total,
            compressed: encoded.compressed,
            data: encoded.blob,
        }
    }
}

/// Row counts and size of a fragment
#[derive(Debug, Clone, Serialize)]
pub struct FragmentStats {
    pub path: PathBuf,
    pub shard_count: u32,
    pub hours_in_month: u32,
    /// Rows in each shard, indexed by shard id
    pub rows_per_shard: Vec<u64>,
    pub compressed_rows: u64,
    pub file_size_bytes: u64,
}

impl FragmentStats {
    pub fn total_rows(&self) -> u64 {
        self.rows_per_shard.iter().sum()
    }
}

/// Page statistics after a vacuum
#[derive(Debug, Clone, Copy, Serialize)]
pub struct VacuumReport {
    pub page_size: u64,
    pub page_count: u64,
    pub freelist_count: u64,
}
