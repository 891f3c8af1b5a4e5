//! Namespaces and time-major accumulation
//!
//! Items of a namespace are stored as `namespace/item`. The namespace total
//! lives under the bare namespace key as an f64 vector with NaN for hours in
//! which nothing was recorded.

use super::Store;
use crate::config::NAMESPACE_DELIMITER;
use crate::{HourError, Hour, Month, Result, SeriesData};
use std::collections::BTreeMap;
use tracing::debug;

/// Full series name of an item
pub fn item_name(namespace: &str, item: &str) -> String {
    format!("{}{}{}", namespace, NAMESPACE_DELIMITER, item)
}

/// Namespace part of a series name, if it has one
pub fn namespace_of(name: &str) -> Option<&str> {
    name.split_once(NAMESPACE_DELIMITER).map(|(ns, _)| ns)
}

/// Key range `[start, end)` covering every item of a namespace
pub fn namespace_range(namespace: &str) -> (String, String) {
    let successor = char::from_u32(NAMESPACE_DELIMITER as u32 + 1).unwrap_or(char::MAX);
    (
        format!("{}{}", namespace, NAMESPACE_DELIMITER),
        format!("{}{}", namespace, successor),
    )
}

pub(crate) fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() || namespace.contains(NAMESPACE_DELIMITER) {
        return Err(HourError::InvalidName(namespace.to_string()));
    }
    Ok(())
}

/// Accumulates hourly counts for one namespace and month
///
/// Counts arrive time-major (hour by hour); `commit` writes them item-major,
/// one vector per item plus the namespace total, in a single transaction.
pub struct HourlyBatch<'a> {
    store: &'a Store,
    namespace: String,
    month: Month,
    items: BTreeMap<String, Vec<f64>>,
    totals: Vec<f64>,
}

impl<'a> HourlyBatch<'a> {
    pub(crate) fn new(store: &'a Store, namespace: &str, month: Month) -> Result<Self> {
        validate_namespace(namespace)?;
        Ok(Self {
            store,
            namespace: namespace.to_string(),
            month,
            items: BTreeMap::new(),
            totals: vec![f64::NAN; month.hours() as usize],
        })
    }

    fn check_hour(&self, name: &str, hour: Hour) -> Result<()> {
        if hour >= self.totals.len() {
            return Err(HourError::Dimension {
                name: name.to_string(),
                expected: self.totals.len(),
                actual: hour + 1,
            });
        }
        Ok(())
    }

    /// Add `count` to an item at an hour, marking the hour as recorded
    pub fn add(&mut self, item: &str, hour: Hour, count: f64) -> Result<()> {
        if item.is_empty() {
            return Err(HourError::InvalidName(item_name(&self.namespace, item)));
        }
        self.check_hour(item, hour)?;

        let hours = self.totals.len();
        let values = self
            .items
            .entry(item.to_string())
            .or_insert_with(|| vec![0.0; hours]);
        values[hour] += count;

        let total = &mut self.totals[hour];
        if total.is_nan() {
            *total = 0.0;
        }
        *total += count;
        Ok(())
    }

    /// Record that an hour was processed even if no item had activity
    pub fn mark_hour(&mut self, hour: Hour) -> Result<()> {
        self.check_hour(&self.namespace, hour)?;
        if self.totals[hour].is_nan() {
            self.totals[hour] = 0.0;
        }
        Ok(())
    }

    /// Items accumulated so far
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Namespace total as accumulated so far
    pub fn totals(&self) -> &[f64] {
        &self.totals
    }

    /// Write every item and the namespace total; returns items written
    ///
    /// Items below the write pruning threshold are skipped.
    pub fn commit(self) -> Result<usize> {
        let HourlyBatch {
            store,
            namespace,
            month,
            items,
            totals,
        } = self;

        let written = store.write_batch(month, |batch| {
            let mut written = 0;
            for (item, values) in &items {
                let data = SeriesData::F32(values.iter().map(|&v| v as f32).collect());
                if batch.put(&item_name(&namespace, item), &data)?.is_written() {
                    written += 1;
                }
            }
            batch.put_namespace_total(&namespace, &totals)?;
            Ok(written)
        })?;

        debug!(
            "Committed {} of {} items for {} in {}",
            written,
            items.len(),
            namespace,
            month
        );
        Ok(written)
    }
}
