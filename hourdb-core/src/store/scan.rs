//! Item-major iteration over a fragment

use crate::codec::{parse_dtype, Codec};
use crate::fragment::{Fragment, Row, ShardScan};
use crate::{HourError, Result, Series, SeriesData, ShardId};
use std::ops::Range;
use std::sync::Arc;
use tracing::warn;

/// One row produced by a scan
#[derive(Debug)]
pub enum ScanEntry {
    /// Decoded series
    Item(Series),
    /// The row exists but could not be decoded
    Failed { name: String, error: HourError },
}

impl ScanEntry {
    pub fn name(&self) -> &str {
        match self {
            ScanEntry::Item(series) => &series.name,
            ScanEntry::Failed { name, .. } => name,
        }
    }

    pub fn series(&self) -> Option<&Series> {
        match self {
            ScanEntry::Item(series) => Some(series),
            ScanEntry::Failed { .. } => None,
        }
    }

    /// Escalate a per-row failure into an error
    pub fn into_result(self) -> Result<Series> {
        match self {
            ScanEntry::Item(series) => Ok(series),
            ScanEntry::Failed { error, .. } => Err(error),
        }
    }
}

/// Row decoding with optional read-time pruning
#[derive(Debug, Clone, Copy)]
pub(crate) struct RowDecoder {
    codec: Codec,
    prune_threshold: Option<f64>,
    hours: usize,
}

impl RowDecoder {
    pub(crate) fn new(codec: Codec, prune_threshold: Option<f64>, hours: usize) -> Self {
        Self {
            codec,
            prune_threshold,
            hours,
        }
    }

    /// Decode a row, substituting zeros when its total is below the threshold
    pub(crate) fn decode(&self, row: &Row) -> Result<SeriesData> {
        if let Some(threshold) = self.prune_threshold {
            if row.total < threshold {
                let dtype = parse_dtype(&row.name, &row.dtype)?;
                return Ok(SeriesData::zeros(dtype, self.hours));
            }
        }
        self.decode_exact(row)
    }

    /// Decode a row ignoring the pruning threshold
    pub(crate) fn decode_exact(&self, row: &Row) -> Result<SeriesData> {
        self.codec
            .decode(&row.name, &row.dtype, row.compressed, &row.data, self.hours)
    }

    fn entry(&self, row: Row) -> ScanEntry {
        match self.decode(&row) {
            Ok(data) => ScanEntry::Item(Series {
                name: row.name,
                total: row.total,
                data,
            }),
            Err(error) => {
                warn!("Skipping undecodable row {}: {}", row.name, error);
                ScanEntry::Failed {
                    name: row.name,
                    error,
                }
            }
        }
    }
}

/// Lazy scan over a key range of several shards
///
/// Shards are visited in ascending order, names in ascending order within a
/// shard. A fragment-level error is yielded once and ends the scan.
pub struct ItemScan {
    fragment: Option<Arc<Fragment>>,
    shards: Range<ShardId>,
    start: Option<String>,
    end: Option<String>,
    current: Option<ShardScan>,
    decoder: RowDecoder,
    done: bool,
}

impl ItemScan {
    pub(crate) fn new(
        fragment: Arc<Fragment>,
        shards: Range<ShardId>,
        start: Option<String>,
        end: Option<String>,
        decoder: RowDecoder,
    ) -> Self {
        Self {
            fragment: Some(fragment),
            shards,
            start,
            end,
            current: None,
            decoder,
            done: false,
        }
    }

    /// Scan of a month with no fragment
    pub(crate) fn empty(decoder: RowDecoder) -> Self {
        Self {
            fragment: None,
            shards: 0..0,
            start: None,
            end: None,
            current: None,
            decoder,
            done: true,
        }
    }
}

impl Iterator for ItemScan {
    type Item = Result<ScanEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if let Some(scan) = self.current.as_mut() {
                match scan.next() {
                    Some(Ok(row)) => return Some(Ok(self.decoder.entry(row))),
                    Some(Err(e)) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                    None => self.current = None,
                }
                continue;
            }

            let (fragment, shard) = match (&self.fragment, self.shards.next()) {
                (Some(fragment), Some(shard)) => (fragment, shard),
                _ => {
                    self.done = true;
                    return None;
                }
            };

            match fragment.iterate_range(shard, self.start.as_deref(), self.end.as_deref()) {
                Ok(scan) => self.current = Some(scan),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
