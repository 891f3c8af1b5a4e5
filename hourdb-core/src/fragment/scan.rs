//! Lazy, name-ordered scans over one shard

use super::{Fragment, Row};
use crate::{Result, ShardId};
use std::collections::VecDeque;
use std::sync::Arc;

/// Half-open key range `[start, end)`; `None` is unbounded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct KeyRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Iterator over the rows of one shard in name order
///
/// Rows are fetched in pages keyed on the last name seen, so no statement
/// or lock is held between pages and writers can interleave. A row written
/// behind the cursor during the scan is not revisited.
pub struct ShardScan {
    fragment: Arc<Fragment>,
    shard: ShardId,
    range: KeyRange,
    batch_size: usize,
    cursor: Option<String>,
    buffer: VecDeque<Row>,
    exhausted: bool,
}

impl ShardScan {
    pub(crate) fn new(fragment: Arc<Fragment>, shard: ShardId, range: KeyRange, batch_size: usize) -> Self {
        Self {
            fragment,
            shard,
            range,
            batch_size: batch_size.max(1),
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn shard(&self) -> ShardId {
        self.shard
    }

    fn fill(&mut self) -> Result<()> {
        let rows = self.fragment.fetch_page(
            self.shard,
            &self.range,
            self.cursor.as_deref(),
            self.batch_size,
        )?;

        if rows.len() < self.batch_size {
            self.exhausted = true;
        }
        if let Some(last) = rows.last() {
            self.cursor = Some(last.name.clone());
        }
        self.buffer.extend(rows);
        Ok(())
    }
}

impl Iterator for ShardScan {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
