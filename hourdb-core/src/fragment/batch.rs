//! Multi-row writes inside one fragment transaction

use super::{schema, FragmentLayout, Row};
use crate::error::StorageContext;
use crate::{Result, ShardId};
use rusqlite::Transaction;
use std::path::Path;

/// Writes staged inside an immediate transaction
///
/// Obtained from [`Fragment::write_batch`](super::Fragment::write_batch).
/// Reads through the batch see its own uncommitted writes.
pub struct FragmentBatch<'a> {
    tx: Transaction<'a>,
    path: &'a Path,
    layout: FragmentLayout,
    written: usize,
    deleted: usize,
}

impl<'a> FragmentBatch<'a> {
    pub(crate) fn new(tx: Transaction<'a>, path: &'a Path, layout: FragmentLayout) -> Self {
        Self {
            tx,
            path,
            layout,
            written: 0,
            deleted: 0,
        }
    }

    pub fn layout(&self) -> FragmentLayout {
        self.layout
    }

    /// Insert or replace a row
    pub fn put(&mut self, shard: ShardId, row: &Row) -> Result<()> {
        self.layout.check_shard(shard)?;
        schema::upsert(&self.tx, self.path, shard, row)?;
        self.written += 1;
        Ok(())
    }

    pub fn get(&self, shard: ShardId, name: &str) -> Result<Option<Row>> {
        self.layout.check_shard(shard)?;
        schema::select(&self.tx, self.path, shard, name)
    }

    /// Remove a row, returning whether it existed
    pub fn delete(&mut self, shard: ShardId, name: &str) -> Result<bool> {
        self.layout.check_shard(shard)?;
        let removed = schema::remove(&self.tx, self.path, shard, name)?;
        if removed {
            self.deleted += 1;
        }
        Ok(removed)
    }

    /// Remove every row of a shard with `total < threshold`
    pub fn delete_below(&mut self, shard: ShardId, threshold: f64) -> Result<usize> {
        self.layout.check_shard(shard)?;
        let removed = schema::remove_below(&self.tx, self.path, shard, threshold)?;
        self.deleted += removed;
        Ok(removed)
    }

    /// Rows written so far
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn deleted(&self) -> usize {
        self.deleted
    }

    pub(crate) fn commit(self) -> Result<()> {
        self.tx.commit().at(self.path)
    }
}
