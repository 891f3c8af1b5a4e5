//! Store configuration

use crate::codec::CodecConfig;
use crate::config::{
    BUSY_TIMEOUT_MS, CACHE_SIZE_KIB, COMPRESSION_LEVEL, COMPRESSION_THRESHOLD, PAGE_SIZE,
    SCAN_BATCH_SIZE,
};
use crate::fragment::{FragmentOptions, JournalMode, SyncMode};
use crate::{HourError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Shards per new fragment; inferred from the dataset when unset
    pub shard_count: Option<u32>,
    /// Open fragments for writing and create missing ones
    pub writeable: bool,
    /// Series with a total below this are stored compressed
    pub compression_threshold: f64,
    /// zlib level (0-9)
    pub compression_level: u32,
    /// Reads of series with a total below this return zeros
    pub read_prune_threshold: Option<f64>,
    /// Writes of series with a total below this are skipped
    pub write_prune_threshold: Option<f64>,
    pub busy_timeout_ms: u64,
    /// Applied only when a fragment is created
    pub page_size: u32,
    pub cache_size_kib: u32,
    pub journal_mode: JournalMode,
    pub synchronous: SyncMode,
    /// Rows fetched per query during scans
    pub scan_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shard_count: None,
            writeable: false,
            compression_threshold: COMPRESSION_THRESHOLD,
            compression_level: COMPRESSION_LEVEL,
            read_prune_threshold: None,
            write_prune_threshold: None,
            busy_timeout_ms: BUSY_TIMEOUT_MS,
            page_size: PAGE_SIZE,
            cache_size_kib: CACHE_SIZE_KIB,
            journal_mode: JournalMode::default(),
            synchronous: SyncMode::default(),
            scan_batch_size: SCAN_BATCH_SIZE,
        }
    }
}

impl StoreConfig {
    /// Read-write configuration creating fragments with `shard_count` shards
    pub fn writer(shard_count: u32) -> Self {
        Self {
            shard_count: Some(shard_count),
            writeable: true,
            ..Default::default()
        }
    }

    /// Load from a JSON file; absent fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: StoreConfig = serde_json::from_str(&text)
            .map_err(|e| HourError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == Some(0) {
            return Err(HourError::Config("shard_count must be at least 1".into()));
        }
        if !(512..=65536).contains(&self.page_size) || !self.page_size.is_power_of_two() {
            return Err(HourError::Config(format!(
                "page_size must be a power of two between 512 and 65536, got {}",
                self.page_size
            )));
        }
        if self.compression_level > 9 {
            return Err(HourError::Config(format!(
                "compression_level must be 0-9, got {}",
                self.compression_level
            )));
        }
        if self.scan_batch_size == 0 {
            return Err(HourError::Config("scan_batch_size must be at least 1".into()));
        }

        let thresholds = [
            ("compression_threshold", Some(self.compression_threshold)),
            ("read_prune_threshold", self.read_prune_threshold),
            ("write_prune_threshold", self.write_prune_threshold),
        ];
        for (field, value) in thresholds {
            if let Some(value) = value {
                if value.is_nan() || value < 0.0 {
                    return Err(HourError::Config(format!(
                        "{} must be a non-negative number, got {}",
                        field, value
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn fragment_options(&self) -> FragmentOptions {
        FragmentOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            page_size: self.page_size,
            cache_size_kib: self.cache_size_kib,
            journal_mode: self.journal_mode,
            synchronous: self.synchronous,
            scan_batch_size: self.scan_batch_size,
        }
    }

    pub fn codec_config(&self) -> CodecConfig {
        CodecConfig {
            threshold: self.compression_threshold,
            level: self.compression_level,
        }
    }
}
