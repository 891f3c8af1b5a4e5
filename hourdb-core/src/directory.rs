//! Dataset directory layout
//!
//! A dataset is a directory with one fragment file per calendar month,
//! named after the first day of that month: `2015-01-01.db`.

use crate::{HourError, Result};
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Fragment file extension
pub const FRAGMENT_EXTENSION: &str = "db";

/// A calendar month in UTC
///
/// Serialized as `YYYY-MM`; deserialization goes through [`FromStr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Month {
    year: i32,
    month: u32,
}

impl Month {
    /// Create a month, validating the month number
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(HourError::InvalidMonth(format!("{:04}-{:02}", year, month)));
        }
        Ok(Self { year, month })
    }

    /// Month containing a timestamp
    pub fn containing(ts: &DateTime<Utc>) -> Self {
        Self {
            year: ts.year(),
            month: ts.month(),
        }
    }

    /// Month starting exactly at `ts`
    ///
    /// Fails unless `ts` is midnight on the first day of a month.
    pub fn starting_at(ts: &DateTime<Utc>) -> Result<Self> {
        if ts.day() != 1 {
            return Err(HourError::InvalidMonth(format!(
                "must have day=1, not {}",
                ts.day()
            )));
        }
        if ts.hour() != 0 || ts.minute() != 0 || ts.second() != 0 || ts.nanosecond() != 0 {
            return Err(HourError::InvalidMonth(format!(
                "{} has non-zero sub-day fields",
                ts
            )));
        }
        Ok(Self::containing(ts))
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// First day of the month
    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).expect("validated on construction")
    }

    /// Following month
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Preceding month
    pub fn prev(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// Number of days in the month
    pub fn days(&self) -> u32 {
        let next = self.next().first_day();
        (next - self.first_day()).num_days() as u32
    }

    /// Number of hours in the month (UTC has no DST)
    pub fn hours(&self) -> u32 {
        self.days() * 24
    }

    /// Consecutive months from `self` through `last` inclusive
    pub fn through(&self, last: Month) -> Vec<Month> {
        let mut months = Vec::new();
        let mut current = *self;
        while current <= last {
            months.push(current);
            current = current.next();
        }
        months
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Month {
    type Err = HourError;

    /// Accepts `YYYY-MM` or `YYYY-MM-01`
    fn from_str(s: &str) -> Result<Self> {
        let date = match s.len() {
            7 => NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d"),
            10 => NaiveDate::parse_from_str(s, "%Y-%m-%d"),
            _ => return Err(HourError::InvalidMonth(s.to_string())),
        }
        .map_err(|e| HourError::InvalidMonth(format!("{}: {}", s, e)))?;

        if date.day() != 1 {
            return Err(HourError::InvalidMonth(format!(
                "{}: must have day=1, not {}",
                s,
                date.day()
            )));
        }

        Month::new(date.year(), date.month())
    }
}

impl TryFrom<String> for Month {
    type Error = HourError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Month> for String {
    fn from(month: Month) -> Self {
        month.to_string()
    }
}

/// Path of the fragment file for a month
pub fn resolve(dir: &Path, month: Month) -> PathBuf {
    dir.join(format!("{}.{}", month.first_day(), FRAGMENT_EXTENSION))
}

/// Fragments present in a dataset directory, ascending by month
///
/// Files that do not follow the naming convention are skipped. A missing
/// directory holds no fragments.
pub fn list_fragments(dir: &Path) -> Result<Vec<(Month, PathBuf)>> {
    let mut fragments = Vec::new();

    if !dir.exists() {
        return Ok(fragments);
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) != Some(FRAGMENT_EXTENSION) {
            continue;
        }

        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem,
            None => continue,
        };

        match stem.parse::<Month>() {
            Ok(month) if stem.len() == 10 => fragments.push((month, path)),
            _ => debug!("Skipping non-fragment file {:?}", path),
        }
    }

    fragments.sort_by_key(|(month, _)| *month);

    Ok(fragments)
}

/// Total hours covered by the fragments in a directory
pub fn dataset_hours(dir: &Path) -> Result<u64> {
    Ok(list_fragments(dir)?
        .iter()
        .map(|(month, _)| month.hours() as u64)
        .sum())
}
