//! Fragment handle

use super::scan::KeyRange;
use super::{
    schema, FragmentBatch, FragmentLayout, FragmentOptions, FragmentStats, LayoutCheck, Row,
    ShardScan, VacuumReport,
};
use crate::error::StorageContext;
use crate::router::ShardRouter;
use crate::{HourError, Result, ShardId};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OpenFlags, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, info, warn};

/// One month of sharded series, backed by a single SQLite file
///
/// The connection is serialized behind a mutex; separate processes (or
/// separate handles in one process) coordinate through SQLite's file locks.
pub struct Fragment {
    path: PathBuf,
    layout: FragmentLayout,
    router: ShardRouter,
    writeable: bool,
    scan_batch_size: usize,
    conn: Mutex<Connection>,
    /// Thread running `write_batch`, which holds `conn` for the closure
    batch_owner: Mutex<Option<ThreadId>>,
}

impl Fragment {
    /// Open read-write, creating the file and schema if absent
    ///
    /// An existing file must match `layout`; on mismatch nothing is written.
    pub fn open(path: impl AsRef<Path>, layout: FragmentLayout, options: &FragmentOptions) -> Result<Self> {
        let router = ShardRouter::new(layout.shard_count)?;
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let mut conn = Connection::open_with_flags(&path, flags).at(&path)?;
        conn.busy_timeout(options.busy_timeout).at(&path)?;

        if schema::is_initialized(&conn, &path)? {
            schema::read_layout(&conn, &path, LayoutCheck::exact(layout))?;
            debug!("Opened fragment {:?}", path);
        } else {
            initialize(&mut conn, &path, layout, options)?;
        }

        configure(&conn, &path, options, true)?;

        Ok(Self {
            path,
            layout,
            router,
            writeable: true,
            scan_batch_size: options.scan_batch_size,
            conn: Mutex::new(conn),
            batch_owner: Mutex::new(None),
        })
    }

    /// Open an existing fragment read-write, taking its layout from metadata
    pub fn open_existing(path: impl AsRef<Path>, check: LayoutCheck, options: &FragmentOptions) -> Result<Self> {
        Self::open_with(path.as_ref(), check, options, true)
    }

    /// Open an existing fragment without write access
    pub fn open_read_only(path: impl AsRef<Path>, check: LayoutCheck, options: &FragmentOptions) -> Result<Self> {
        Self::open_with(path.as_ref(), check, options, false)
    }

    fn open_with(path: &Path, check: LayoutCheck, options: &FragmentOptions, writeable: bool) -> Result<Self> {
        if !path.is_file() {
            return Err(HourError::FragmentNotFound(path.to_path_buf()));
        }

        let flags = if writeable {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        };
        let conn = Connection::open_with_flags(path, flags).at(path)?;
        conn.busy_timeout(options.busy_timeout).at(path)?;

        let layout = schema::read_layout(&conn, path, check)?;
        let router = ShardRouter::new(layout.shard_count)?;
        configure(&conn, path, options, writeable)?;

        debug!(
            "Opened fragment {:?} ({} shards, writeable={})",
            path, layout.shard_count, writeable
        );

        Ok(Self {
            path: path.to_path_buf(),
            layout,
            router,
            writeable,
            scan_batch_size: options.scan_batch_size,
            conn: Mutex::new(conn),
            batch_owner: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> FragmentLayout {
        self.layout
    }

    /// Router for this fragment's shard count
    pub fn router(&self) -> ShardRouter {
        self.router
    }

    pub fn is_writeable(&self) -> bool {
        self.writeable
    }

    /// Lock the connection, failing instead of deadlocking when the caller
    /// is this fragment's own batch closure
    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        if *self.batch_owner.lock() == Some(thread::current().id()) {
            return Err(HourError::Reentrant(self.path.clone()));
        }
        Ok(self.conn.lock())
    }

    fn ensure_writeable(&self) -> Result<()> {
        if !self.writeable {
            return Err(HourError::ReadOnly(self.path.clone()));
        }
        Ok(())
    }

    /// Insert or replace a row
    pub fn put(&self, shard: ShardId, row: &Row) -> Result<()> {
        self.ensure_writeable()?;
        self.layout.check_shard(shard)?;
        let conn = self.lock()?;
        schema::upsert(&conn, &self.path, shard, row)
    }

    /// Point lookup by name
    pub fn get(&self, shard: ShardId, name: &str) -> Result<Option<Row>> {
        self.layout.check_shard(shard)?;
        let conn = self.lock()?;
        schema::select(&conn, &self.path, shard, name)
    }

    pub fn exists(&self, shard: ShardId, name: &str) -> Result<bool> {
        self.layout.check_shard(shard)?;
        let conn = self.lock()?;
        schema::contains(&conn, &self.path, shard, name)
    }

    /// Remove a row, returning whether it existed
    pub fn delete(&self, shard: ShardId, name: &str) -> Result<bool> {
        self.ensure_writeable()?;
        self.layout.check_shard(shard)?;
        let conn = self.lock()?;
        schema::remove(&conn, &self.path, shard, name)
    }

    /// Every row of a shard in name order
    ///
    /// Each call starts a fresh scan.
    pub fn iterate(self: &Arc<Self>, shard: ShardId) -> Result<ShardScan> {
        self.layout.check_shard(shard)?;
        Ok(ShardScan::new(
            Arc::clone(self),
            shard,
            KeyRange::default(),
            self.scan_batch_size,
        ))
    }

    /// Rows of a shard with `start <= name < end`
    pub fn iterate_range(
        self: &Arc<Self>,
        shard: ShardId,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<ShardScan> {
        self.layout.check_shard(shard)?;
        let range = KeyRange {
            start: start.map(str::to_string),
            end: end.map(str::to_string),
        };
        Ok(ShardScan::new(Arc::clone(self), shard, range, self.scan_batch_size))
    }

    pub(crate) fn fetch_page(
        &self,
        shard: ShardId,
        range: &KeyRange,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Row>> {
        let conn = self.lock()?;
        schema::select_page(&conn, &self.path, shard, range, after, limit)
    }

    /// Run several writes in one immediate transaction
    ///
    /// The transaction commits if `f` returns `Ok` and rolls back otherwise.
    /// Other handles on this fragment block (or fail with `Busy`) until it
    /// finishes. Inside `f`, use only the batch: any other call on this
    /// fragment from the same thread fails with `Reentrant`.
    pub fn write_batch<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut FragmentBatch<'_>) -> Result<T>,
    {
        self.ensure_writeable()?;
        let mut conn = self.lock()?;
        let _owner = BatchOwner::claim(&self.batch_owner);
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .at(&self.path)?;

        let mut batch = FragmentBatch::new(tx, &self.path, self.layout);
        let value = f(&mut batch)?;
        debug!(
            "Committing batch on {:?}: {} written, {} deleted",
            self.path,
            batch.written(),
            batch.deleted()
        );
        batch.commit()?;

        Ok(value)
    }

    /// Delete every row with `total < threshold`
    pub fn prune(&self, threshold: f64) -> Result<usize> {
        self.ensure_writeable()?;
        let shards = 0..self.layout.shard_count;

        let removed = self.write_batch(|batch| {
            let mut removed = 0;
            for shard in shards {
                removed += batch.delete_below(shard, threshold)?;
            }
            Ok(removed)
        })?;

        info!(
            "Pruned {} rows below {} from {:?}",
            removed, threshold, self.path
        );
        Ok(removed)
    }

    /// Rebuild the file, reclaiming free pages
    pub fn vacuum(&self) -> Result<VacuumReport> {
        self.ensure_writeable()?;
        let conn = self.lock()?;
        conn.execute_batch("VACUUM").at(&self.path)?;

        let pragma = |name: &str| -> Result<u64> {
            let value: i64 = conn
                .pragma_query_value(None, name, |r| r.get(0))
                .at(&self.path)?;
            Ok(value as u64)
        };
        let report = VacuumReport {
            page_size: pragma("page_size")?,
            page_count: pragma("page_count")?,
            freelist_count: pragma("freelist_count")?,
        };

        info!(
            "Vacuumed {:?}: {} bytes used; {} total, {} free pages",
            self.path,
            report.page_size * report.page_count,
            report.page_count,
            report.freelist_count
        );
        Ok(report)
    }

    /// Row counts per shard and file size
    pub fn stats(&self) -> Result<FragmentStats> {
        let mut rows_per_shard = Vec::with_capacity(self.layout.shard_count as usize);
        let mut compressed_rows = 0;
        {
            let conn = self.lock()?;
            for shard in 0..self.layout.shard_count {
                let (rows, compressed) = schema::count(&conn, &self.path, shard)?;
                rows_per_shard.push(rows);
                compressed_rows += compressed;
            }
        }

        Ok(FragmentStats {
            path: self.path.clone(),
            shard_count: self.layout.shard_count,
            hours_in_month: self.layout.hours_in_month,
            rows_per_shard,
            compressed_rows,
            file_size_bytes: std::fs::metadata(&self.path)?.len(),
        })
    }

    /// Close the connection, reporting any error from SQLite
    pub fn close(self) -> Result<()> {
        let path = self.path;
        self.conn
            .into_inner()
            .close()
            .map_err(|(_, e)| HourError::storage(&path, e))?;
        debug!("Closed fragment {:?}", path);
        Ok(())
    }
}

/// Marks the current thread as running a batch until dropped
struct BatchOwner<'a>(&'a Mutex<Option<ThreadId>>);

impl<'a> BatchOwner<'a> {
    fn claim(owner: &'a Mutex<Option<ThreadId>>) -> Self {
        *owner.lock() = Some(thread::current().id());
        Self(owner)
    }
}

impl Drop for BatchOwner<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

impl std::fmt::Debug for Fragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fragment")
            .field("path", &self.path)
            .field("layout", &self.layout)
            .field("writeable", &self.writeable)
            .finish()
    }
}

/// Create the schema inside an immediate transaction
///
/// If another process initialized the file first, its layout is validated
/// instead.
fn initialize(conn: &mut Connection, path: &Path, layout: FragmentLayout, options: &FragmentOptions) -> Result<()> {
    // page_size must be set before the first table exists
    conn.execute_batch("PRAGMA encoding = 'UTF-8'").at(path)?;
    conn.pragma_update(None, "page_size", options.page_size).at(path)?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .at(path)?;

    if schema::is_initialized(&tx, path)? {
        schema::read_layout(&tx, path, LayoutCheck::exact(layout))?;
        debug!("Fragment {:?} was initialized concurrently", path);
        return Ok(());
    }

    schema::create(&tx, path, layout)?;
    tx.commit().at(path)?;

    info!(
        "Created fragment {:?} ({} shards, {} hours)",
        path, layout.shard_count, layout.hours_in_month
    );
    Ok(())
}

/// Apply per-connection pragmas
fn configure(conn: &Connection, path: &Path, options: &FragmentOptions, writeable: bool) -> Result<()> {
    if writeable {
        let requested = options.journal_mode.as_str();
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", requested, |r| r.get(0))
            .at(path)?;
        if !mode.eq_ignore_ascii_case(requested) {
            warn!(
                "Journal mode for {:?} is {}, requested {}",
                path, mode, requested
            );
        }
        conn.pragma_update(None, "synchronous", options.synchronous.as_str())
            .at(path)?;
    }
    conn.pragma_update(None, "cache_size", -(options.cache_size_kib as i64))
        .at(path)?;
    Ok(())
}
