//! Table layout and the row-level SQL shared by fragments and batches

use super::scan::KeyRange;
use super::{FragmentLayout, LayoutCheck, Row};
use crate::error::StorageContext;
use crate::router::HASH_NAME;
use crate::{HourError, Result, ShardId};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

/// On-disk format version written to `metadata`
pub const SCHEMA_VERSION: u32 = 1;

const COLUMNS: &str = "name, dtype, total, compressed, data";

fn table(shard: ShardId) -> String {
    format!("data{}", shard)
}

fn map_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    Ok(Row {
        name: r.get(0)?,
        dtype: r.get(1)?,
        total: r.get(2)?,
        compressed: r.get(3)?,
        data: r.get(4)?,
    })
}

/// Whether the file already carries a metadata table
pub(crate) fn is_initialized(conn: &Connection, path: &Path) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'metadata'",
            [],
            |r| r.get(0),
        )
        .at(path)?;
    Ok(count > 0)
}

/// Create the metadata and shard tables
pub(crate) fn create(conn: &Connection, path: &Path, layout: FragmentLayout) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE metadata (
            key TEXT NOT NULL PRIMARY KEY,
            value TEXT NOT NULL
        ) WITHOUT ROWID",
    )
    .at(path)?;

    let entries = [
        ("schema_version", SCHEMA_VERSION.to_string()),
        ("shard_count", layout.shard_count.to_string()),
        ("hours_in_month", layout.hours_in_month.to_string()),
        ("hash", HASH_NAME.to_string()),
    ];
    for (key, value) in entries.iter() {
        conn.execute(
            "INSERT INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .at(path)?;
    }

    for shard in 0..layout.shard_count {
        conn.execute_batch(&format!(
            "CREATE TABLE {} (
                name TEXT NOT NULL PRIMARY KEY,
                dtype TEXT NOT NULL,
                total REAL NOT NULL,
                compressed INTEGER NOT NULL,
                data BLOB NOT NULL
            ) WITHOUT ROWID",
            table(shard)
        ))
        .at(path)?;
    }

    Ok(())
}

fn read_metadata(conn: &Connection, path: &Path) -> Result<HashMap<String, String>> {
    let mut stmt = conn.prepare("SELECT key, value FROM metadata").at(path)?;
    let entries = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .at(path)?
        .collect::<rusqlite::Result<HashMap<_, _>>>()
        .at(path)?;
    Ok(entries)
}

fn mismatch(path: &Path, key: &str, expected: impl ToString, found: impl ToString) -> HourError {
    HourError::SchemaMismatch {
        path: path.to_path_buf(),
        key: key.to_string(),
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

fn expect_entry(
    path: &Path,
    meta: &HashMap<String, String>,
    key: &str,
    expected: &str,
) -> Result<()> {
    match meta.get(key) {
        Some(found) if found == expected => Ok(()),
        Some(found) => Err(mismatch(path, key, expected, found)),
        None => Err(mismatch(path, key, expected, "<missing>")),
    }
}

fn numeric_entry(path: &Path, meta: &HashMap<String, String>, key: &str) -> Result<u32> {
    let raw = meta
        .get(key)
        .ok_or_else(|| mismatch(path, key, "a positive integer", "<missing>"))?;
    match raw.parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(mismatch(path, key, "a positive integer", raw)),
    }
}

/// Read and validate the stored layout
///
/// Nothing is written, so a mismatch leaves the file untouched.
pub(crate) fn read_layout(conn: &Connection, path: &Path, check: LayoutCheck) -> Result<FragmentLayout> {
    if !is_initialized(conn, path)? {
        return Err(mismatch(path, "metadata", "present", "<missing>"));
    }

    let meta = read_metadata(conn, path)?;
    expect_entry(path, &meta, "schema_version", &SCHEMA_VERSION.to_string())?;
    expect_entry(path, &meta, "hash", HASH_NAME)?;

    let layout = FragmentLayout {
        shard_count: numeric_entry(path, &meta, "shard_count")?,
        hours_in_month: numeric_entry(path, &meta, "hours_in_month")?,
    };

    if let Some(expected) = check.shard_count {
        if expected != layout.shard_count {
            return Err(mismatch(path, "shard_count", expected, layout.shard_count));
        }
    }
    if let Some(expected) = check.hours_in_month {
        if expected != layout.hours_in_month {
            return Err(mismatch(path, "hours_in_month", expected, layout.hours_in_month));
        }
    }

    let tables: i64 = conn
        .query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name GLOB 'data[0-9]*'",
            [],
            |r| r.get(0),
        )
        .at(path)?;
    if tables != layout.shard_count as i64 {
        return Err(mismatch(path, "data tables", layout.shard_count, tables));
    }

    Ok(layout)
}

pub(crate) fn upsert(conn: &Connection, path: &Path, shard: ShardId, row: &Row) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(name) DO UPDATE SET
            dtype = excluded.dtype,
            total = excluded.total,
            compressed = excluded.compressed,
            data = excluded.data",
        table(shard),
        COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql).at(path)?;
    stmt.execute(params![row.name, row.dtype, row.total, row.compressed, row.data])
        .at(path)?;
    Ok(())
}

pub(crate) fn select(conn: &Connection, path: &Path, shard: ShardId, name: &str) -> Result<Option<Row>> {
    let sql = format!("SELECT {} FROM {} WHERE name = ?1", COLUMNS, table(shard));
    let mut stmt = conn.prepare_cached(&sql).at(path)?;
    stmt.query_row(params![name], map_row).optional().at(path)
}

pub(crate) fn contains(conn: &Connection, path: &Path, shard: ShardId, name: &str) -> Result<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE name = ?1", table(shard));
    let mut stmt = conn.prepare_cached(&sql).at(path)?;
    let found = stmt
        .query_row(params![name], |r| r.get::<_, i64>(0))
        .optional()
        .at(path)?;
    Ok(found.is_some())
}

pub(crate) fn remove(conn: &Connection, path: &Path, shard: ShardId, name: &str) -> Result<bool> {
    let sql = format!("DELETE FROM {} WHERE name = ?1", table(shard));
    let mut stmt = conn.prepare_cached(&sql).at(path)?;
    Ok(stmt.execute(params![name]).at(path)? > 0)
}

pub(crate) fn remove_below(conn: &Connection, path: &Path, shard: ShardId, threshold: f64) -> Result<usize> {
    let sql = format!("DELETE FROM {} WHERE total < ?1", table(shard));
    conn.execute(&sql, params![threshold]).at(path)
}

/// Row count and compressed row count of one shard
pub(crate) fn count(conn: &Connection, path: &Path, shard: ShardId) -> Result<(u64, u64)> {
    let sql = format!(
        "SELECT count(*), coalesce(sum(compressed), 0) FROM {}",
        table(shard)
    );
    let (rows, compressed): (i64, i64) = conn
        .query_row(&sql, [], |r| Ok((r.get(0)?, r.get(1)?)))
        .at(path)?;
    Ok((rows as u64, compressed as u64))
}

/// One page of a keyset scan
///
/// Rows come back in name order, strictly after `after` when given, and
/// within `range`.
pub(crate) fn select_page(
    conn: &Connection,
    path: &Path,
    shard: ShardId,
    range: &KeyRange,
    after: Option<&str>,
    limit: usize,
) -> Result<Vec<Row>> {
    let mut clauses = Vec::new();
    let mut values: Vec<&str> = Vec::new();

    match (after, range.start.as_deref()) {
        (Some(last), _) => {
            clauses.push("name > ?");
            values.push(last);
        }
        (None, Some(start)) => {
            clauses.push("name >= ?");
            values.push(start);
        }
        (None, None) => {}
    }
    if let Some(end) = range.end.as_deref() {
        clauses.push("name < ?");
        values.push(end);
    }

    let filter = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT {} FROM {}{} ORDER BY name LIMIT {}",
        COLUMNS,
        table(shard),
        filter,
        limit
    );

    let mut stmt = conn.prepare_cached(&sql).at(path)?;
    let rows = stmt
        .query_map(params_from_iter(values), map_row)
        .at(path)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .at(path)?;
    Ok(rows)
}
