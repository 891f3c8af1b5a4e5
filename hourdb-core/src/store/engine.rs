//! Store handle

use super::namespace::{namespace_range, validate_namespace, HourlyBatch};
use super::scan::{ItemScan, RowDecoder};
use super::{PutOutcome, StoreConfig};
use crate::codec::Codec;
use crate::directory::{self, Month};
use crate::fragment::{
    Fragment, FragmentBatch, FragmentLayout, FragmentOptions, FragmentStats, LayoutCheck, Row,
    VacuumReport,
};
use crate::router::ShardRouter;
use crate::{DType, HourError, Result, SeriesData, ShardId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handle on one dataset directory
///
/// Fragments are opened on first use and cached until [`Store::close`] or
/// drop. The handle is `Send + Sync`; separate handles (in this process or
/// others) coordinate through the fragments' file locks.
pub struct Store {
    directory: PathBuf,
    config: StoreConfig,
    codec: Codec,
    options: FragmentOptions,
    fragments: RwLock<HashMap<Month, Arc<Fragment>>>,
    closed: AtomicBool,
}

impl Store {
    /// Open a dataset directory
    ///
    /// A writeable store creates the directory; a read-only one requires it.
    pub fn open(directory: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let directory = directory.as_ref().to_path_buf();

        if config.writeable {
            std::fs::create_dir_all(&directory)?;
        } else if !directory.is_dir() {
            return Err(HourError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("not a directory: {}", directory.display()),
            )));
        }

        info!(
            "Opened store {:?} (writeable={}, shard_count={:?})",
            directory, config.writeable, config.shard_count
        );

        Ok(Self {
            codec: Codec::new(config.codec_config()),
            options: config.fragment_options(),
            directory,
            config,
            fragments: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(HourError::Closed);
        }
        Ok(())
    }

    fn ensure_writeable(&self) -> Result<()> {
        self.check_open()?;
        if !self.config.writeable {
            return Err(HourError::ReadOnly(self.directory.clone()));
        }
        Ok(())
    }

    /// Cached fragment for a month
    ///
    /// A missing file yields `None` unless `create` is set on a writeable
    /// store.
    fn fragment(&self, month: Month, create: bool) -> Result<Option<Arc<Fragment>>> {
        self.check_open()?;

        if let Some(fragment) = self.fragments.read().get(&month) {
            return Ok(Some(Arc::clone(fragment)));
        }

        let mut fragments = self.fragments.write();
        if let Some(fragment) = fragments.get(&month) {
            return Ok(Some(Arc::clone(fragment)));
        }

        let path = directory::resolve(&self.directory, month);
        let exists = path.is_file();
        if !exists && !(create && self.config.writeable) {
            return Ok(None);
        }

        let hours = month.hours();
        let check = LayoutCheck {
            shard_count: self.config.shard_count,
            hours_in_month: Some(hours),
        };
        let fragment = if !self.config.writeable {
            Fragment::open_read_only(&path, check, &self.options)?
        } else if let Some(shard_count) = self.config.shard_count {
            Fragment::open(&path, FragmentLayout::new(shard_count, hours)?, &self.options)?
        } else if exists {
            Fragment::open_existing(&path, check, &self.options)?
        } else {
            let shard_count = self.infer_shard_count(&fragments, month)?;
            Fragment::open(&path, FragmentLayout::new(shard_count, hours)?, &self.options)?
        };

        let fragment = Arc::new(fragment);
        fragments.insert(month, Arc::clone(&fragment));
        Ok(Some(fragment))
    }

    fn fragment_for_write(&self, month: Month) -> Result<Arc<Fragment>> {
        self.ensure_writeable()?;
        self.fragment(month, true)?
            .ok_or_else(|| HourError::FragmentNotFound(directory::resolve(&self.directory, month)))
    }

    fn existing_fragment(&self, month: Month) -> Result<Arc<Fragment>> {
        self.fragment(month, false)?
            .ok_or_else(|| HourError::FragmentNotFound(directory::resolve(&self.directory, month)))
    }

    /// Shard count for a new fragment when none is configured
    ///
    /// Taken from any open fragment, else the latest fragment on disk.
    fn infer_shard_count(&self, open: &HashMap<Month, Arc<Fragment>>, month: Month) -> Result<u32> {
        if let Some(fragment) = open.values().next() {
            return Ok(fragment.layout().shard_count);
        }

        if let Some((_, path)) = directory::list_fragments(&self.directory)?.last() {
            let fragment = Fragment::open_read_only(path, LayoutCheck::default(), &self.options)?;
            let shard_count = fragment.layout().shard_count;
            fragment.close()?;
            debug!("Inferred shard_count={} from {:?}", shard_count, path);
            return Ok(shard_count);
        }

        Err(HourError::Config(format!(
            "shard_count is required to create the first fragment ({})",
            month
        )))
    }

    fn decoder(&self, month: Month, prune: bool) -> RowDecoder {
        let threshold = if prune {
            self.config.read_prune_threshold
        } else {
            None
        };
        RowDecoder::new(self.codec, threshold, month.hours() as usize)
    }

    /// Validate and encode a vector; `None` when write pruning drops it
    fn encode_row(&self, name: &str, month: Month, data: &SeriesData, prunable: bool) -> Result<Option<Row>> {
        if name.is_empty() {
            return Err(HourError::InvalidName(name.to_string()));
        }
        let expected = month.hours() as usize;
        if data.len() != expected {
            return Err(HourError::Dimension {
                name: name.to_string(),
                expected,
                actual: data.len(),
            });
        }

        let encoded = self.codec.encode(data)?;
        if prunable {
            if let Some(threshold) = self.config.write_prune_threshold {
                if encoded.total < threshold {
                    debug!("Skipping {} in {}: total {} below {}", name, month, encoded.total, threshold);
                    return Ok(None);
                }
            }
        }

        Ok(Some(Row::from_encoded(name, encoded)))
    }

    /// Store a series for a month, replacing any previous vector
    pub fn put(&self, name: &str, month: Month, data: &SeriesData) -> Result<PutOutcome> {
        self.ensure_writeable()?;
        let row = match self.encode_row(name, month, data, true)? {
            Some(row) => row,
            None => return Ok(PutOutcome::Skipped),
        };

        let fragment = self.fragment_for_write(month)?;
        let shard = fragment.router().route(name);
        fragment.put(shard, &row)?;

        Ok(PutOutcome::Written {
            compressed: row.compressed,
        })
    }

    /// Read a series
    ///
    /// With read pruning configured, a series whose total is below the
    /// threshold comes back as zeros of its stored type.
    pub fn get(&self, name: &str, month: Month) -> Result<Option<SeriesData>> {
        let fragment = match self.fragment(month, false)? {
            Some(fragment) => fragment,
            None => return Ok(None),
        };
        let shard = fragment.router().route(name);

        match fragment.get(shard, name)? {
            Some(row) => Ok(Some(self.decoder(month, true).decode(&row)?)),
            None => Ok(None),
        }
    }

    /// Whether a row exists, regardless of pruning
    pub fn exists(&self, name: &str, month: Month) -> Result<bool> {
        match self.fragment(month, false)? {
            Some(fragment) => fragment.exists(fragment.router().route(name), name),
            None => Ok(false),
        }
    }

    /// Remove a series, returning whether it existed
    pub fn delete(&self, name: &str, month: Month) -> Result<bool> {
        self.ensure_writeable()?;
        match self.fragment(month, false)? {
            Some(fragment) => fragment.delete(fragment.router().route(name), name),
            None => Ok(false),
        }
    }

    /// Store a namespace total; NaN marks hours with no recorded activity
    pub fn put_namespace_total(&self, namespace: &str, month: Month, totals: &[f64]) -> Result<()> {
        self.ensure_writeable()?;
        validate_namespace(namespace)?;
        let data = SeriesData::F64(totals.to_vec());
        if let Some(row) = self.encode_row(namespace, month, &data, false)? {
            let fragment = self.fragment_for_write(month)?;
            fragment.put(fragment.router().route(namespace), &row)?;
        }
        Ok(())
    }

    /// Namespace total, all NaN if never recorded
    ///
    /// Totals are never pruned on read.
    pub fn get_namespace_total(&self, namespace: &str, month: Month) -> Result<Vec<f64>> {
        validate_namespace(namespace)?;
        let missing = || vec![f64::NAN; month.hours() as usize];

        let fragment = match self.fragment(month, false)? {
            Some(fragment) => fragment,
            None => return Ok(missing()),
        };
        let row = match fragment.get(fragment.router().route(namespace), namespace)? {
            Some(row) => row,
            None => return Ok(missing()),
        };

        match self.decoder(month, false).decode_exact(&row)? {
            SeriesData::F64(values) => Ok(values),
            other => Err(HourError::DTypeMismatch {
                name: namespace.to_string(),
                expected: DType::F64.code(),
                found: other.dtype().code(),
            }),
        }
    }

    /// Every item of a namespace in one month
    ///
    /// Item placement hashes the full name, so every shard is scanned.
    pub fn iterate_items(&self, namespace: &str, month: Month) -> Result<ItemScan> {
        validate_namespace(namespace)?;
        let decoder = self.decoder(month, true);
        let fragment = match self.fragment(month, false)? {
            Some(fragment) => fragment,
            None => return Ok(ItemScan::empty(decoder)),
        };

        let (start, end) = namespace_range(namespace);
        let shards = fragment.router().shards();
        Ok(ItemScan::new(fragment, shards, Some(start), Some(end), decoder))
    }

    /// Every row of one shard in one month
    pub fn iterate_shard(&self, month: Month, shard: ShardId) -> Result<ItemScan> {
        let decoder = self.decoder(month, true);
        let fragment = match self.fragment(month, false)? {
            Some(fragment) => fragment,
            None => return Ok(ItemScan::empty(decoder)),
        };

        fragment.layout().check_shard(shard)?;
        Ok(ItemScan::new(fragment, shard..shard + 1, None, None, decoder))
    }

    /// Run several writes to one month in a single transaction
    ///
    /// Inside `f`, go through the [`StoreBatch`] only. Any other call that
    /// reaches the same month's fragment from this thread fails with
    /// `Reentrant`; other months are unaffected.
    pub fn write_batch<T, F>(&self, month: Month, f: F) -> Result<T>
    where
        F: FnOnce(&mut StoreBatch<'_, '_>) -> Result<T>,
    {
        let fragment = self.fragment_for_write(month)?;
        let router = fragment.router();

        fragment.write_batch(|inner| {
            let mut batch = StoreBatch {
                store: self,
                month,
                router,
                inner,
            };
            f(&mut batch)
        })
    }

    /// Start accumulating hourly counts for a namespace
    pub fn record_hourly(&self, namespace: &str, month: Month) -> Result<HourlyBatch<'_>> {
        self.ensure_writeable()?;
        HourlyBatch::new(self, namespace, month)
    }

    /// A series over the months `first..=last`, concatenated
    ///
    /// Months without the series contribute zeros. Returns `None` if it is
    /// absent from every month. Mixed element types are widened to f64.
    pub fn fetch_span(&self, name: &str, first: Month, last: Month) -> Result<Option<SeriesData>> {
        let months = first.through(last);
        let mut parts = Vec::with_capacity(months.len());
        for month in &months {
            parts.push(self.get(name, *month)?);
        }

        let mut dtypes = parts.iter().flatten().map(SeriesData::dtype);
        let dtype = match dtypes.next() {
            Some(dtype) => dtype,
            None => return Ok(None),
        };
        let uniform = dtypes.all(|d| d == dtype);
        let dtype = if uniform { dtype } else { DType::F64 };

        let mut span = SeriesData::zeros(dtype, 0);
        for (month, part) in months.iter().zip(parts) {
            let piece = match part {
                Some(data) if uniform => data,
                Some(data) => SeriesData::F64(data.to_f64_vec()),
                None => SeriesData::zeros(dtype, month.hours() as usize),
            };
            let appended = span.extend_from(&piece);
            debug_assert!(appended);
        }

        Ok(Some(span))
    }

    /// Months with a fragment in the directory, ascending
    pub fn months(&self) -> Result<Vec<Month>> {
        self.check_open()?;
        Ok(directory::list_fragments(&self.directory)?
            .into_iter()
            .map(|(month, _)| month)
            .collect())
    }

    /// Layout of a month's fragment, if it exists
    pub fn layout(&self, month: Month) -> Result<Option<FragmentLayout>> {
        Ok(self.fragment(month, false)?.map(|f| f.layout()))
    }

    /// Delete every series with `total < threshold` from a month
    pub fn prune(&self, month: Month, threshold: f64) -> Result<usize> {
        self.ensure_writeable()?;
        self.existing_fragment(month)?.prune(threshold)
    }

    /// Rebuild a month's fragment file
    pub fn vacuum(&self, month: Month) -> Result<VacuumReport> {
        self.ensure_writeable()?;
        self.existing_fragment(month)?.vacuum()
    }

    pub fn fragment_stats(&self, month: Month) -> Result<FragmentStats> {
        self.existing_fragment(month)?.stats()
    }

    /// Close every cached fragment
    ///
    /// Later operations fail with `Closed`. Fragments still referenced by a
    /// live scan are released when the scan is dropped.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let fragments: Vec<_> = self.fragments.write().drain().collect();
        let mut first_error = None;
        for (month, fragment) in fragments {
            match Arc::try_unwrap(fragment) {
                Ok(fragment) => {
                    if let Err(e) = fragment.close() {
                        warn!("Failed to close fragment {}: {}", month, e);
                        first_error.get_or_insert(e);
                    }
                }
                Err(_) => debug!("Fragment {} still referenced by a scan", month),
            }
        }

        info!("Closed store {:?}", self.directory);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("directory", &self.directory)
            .field("writeable", &self.config.writeable)
            .field("open_fragments", &self.fragments.read().len())
            .finish()
    }
}

/// Writes to one month inside a fragment transaction
pub struct StoreBatch<'a, 'tx> {
    store: &'a Store,
    month: Month,
    router: ShardRouter,
    inner: &'a mut FragmentBatch<'tx>,
}

impl StoreBatch<'_, '_> {
    pub fn month(&self) -> Month {
        self.month
    }

    pub fn put(&mut self, name: &str, data: &SeriesData) -> Result<PutOutcome> {
        let row = match self.store.encode_row(name, self.month, data, true)? {
            Some(row) => row,
            None => return Ok(PutOutcome::Skipped),
        };
        self.inner.put(self.router.route(name), &row)?;
        Ok(PutOutcome::Written {
            compressed: row.compressed,
        })
    }

    /// Read through the batch, seeing its own writes
    pub fn get(&self, name: &str) -> Result<Option<SeriesData>> {
        match self.inner.get(self.router.route(name), name)? {
            Some(row) => Ok(Some(self.store.decoder(self.month, true).decode(&row)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&mut self, name: &str) -> Result<bool> {
        self.inner.delete(self.router.route(name), name)
    }

    pub fn put_namespace_total(&mut self, namespace: &str, totals: &[f64]) -> Result<()> {
        validate_namespace(namespace)?;
        let data = SeriesData::F64(totals.to_vec());
        if let Some(row) = self.store.encode_row(namespace, self.month, &data, false)? {
            self.inner.put(self.router.route(namespace), &row)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ScanEntry;
    use rand::Rng;
    use std::thread;
    use tempfile::TempDir;

    fn dec_2007() -> Month {
        Month::new(2007, 12).unwrap()
    }

    fn spike(len: usize, hour: usize, value: f32) -> SeriesData {
        let mut v = vec![0.0f32; len];
        v[hour] = value;
        SeriesData::F32(v)
    }

    fn random_series(dtype: DType, len: usize, rng: &mut impl Rng) -> SeriesData {
        match dtype {
            DType::I8 => SeriesData::I8((0..len).map(|_| rng.gen()).collect()),
            DType::U8 => SeriesData::U8((0..len).map(|_| rng.gen()).collect()),
            DType::I16 => SeriesData::I16((0..len).map(|_| rng.gen()).collect()),
            DType::U16 => SeriesData::U16((0..len).map(|_| rng.gen()).collect()),
            DType::I32 => SeriesData::I32((0..len).map(|_| rng.gen()).collect()),
            DType::U32 => SeriesData::U32((0..len).map(|_| rng.gen()).collect()),
            DType::I64 => SeriesData::I64((0..len).map(|_| rng.gen()).collect()),
            DType::U64 => SeriesData::U64((0..len).map(|_| rng.gen()).collect()),
            DType::F32 => SeriesData::F32((0..len).map(|_| rng.gen_range(-1e6..1e6)).collect()),
            DType::F64 => SeriesData::F64((0..len).map(|_| rng.gen_range(-1e12..1e12)).collect()),
        }
    }

    #[test]
    fn test_put_get_spike() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path(), StoreConfig::writer(4)).unwrap();
        let cat = spike(744, 100, 5.0);

        let outcome = store.put("en/Cat", dec_2007(), &cat).unwrap();
        assert_eq!(outcome, PutOutcome::Written { compressed: false });
        assert_eq!(store.get("en/Cat", dec_2007()).unwrap(), Some(cat));
        assert!(temp_dir.path().join("2007-12-01.db").is_file());

        let layout = store.layout(dec_2007()).unwrap().unwrap();
        assert_eq!(layout, FragmentLayout::new(4, 744).unwrap());
    }

    #[test]
    fn test_small_series_compressed() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            compression_threshold: 1.0,
            ..StoreConfig::writer(4)
        };
        let store = Store::open(temp_dir.path(), config).unwrap();
        let quiet = spike(744, 3, 0.5);

        let outcome = store.put("en/Quiet", dec_2007(), &quiet).unwrap();
        assert_eq!(outcome, PutOutcome::Written { compressed: true });
        assert_eq!(store.get("en/Quiet", dec_2007()).unwrap(), Some(quiet));
        assert_eq!(store.fragment_stats(dec_2007()).unwrap().compressed_rows, 1);
    }

    #[test]
    fn test_round_trip_all_dtypes() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path(), StoreConfig::writer(8)).unwrap();
        let month = Month::new(2014, 9).unwrap();
        let mut rng = rand::thread_rng();

        for dtype in DType::ALL {
            let data = random_series(dtype, 720, &mut rng);
            let name = format!("rt/{}", dtype);
            store.put(&name, month, &data).unwrap();
            assert_eq!(store.get(&name, month).unwrap(), Some(data), "{:?}", dtype);
        }

        // small totals take the compressed path
        let mut tiny = vec![0u8; 720];
        tiny[719] = 1;
        store.put("rt/tiny", month, &SeriesData::U8(tiny.clone())).unwrap();
        assert_eq!(store.get("rt/tiny", month).unwrap(), Some(SeriesData::U8(tiny)));
    }

    #[test]
    fn test_repeated_put_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path(), StoreConfig::writer(4)).unwrap();
        let data = spike(744, 10, 42.0);

        let stored_row = || {
            let fragment = store.existing_fragment(dec_2007()).unwrap();
            fragment.get(fragment.router().route("en/Cat"), "en/Cat").unwrap()
        };

        store.put("en/Cat", dec_2007(), &data).unwrap();
        let first = store.fragment_stats(dec_2007()).unwrap();
        let first_row = stored_row();
        store.put("en/Cat", dec_2007(), &data).unwrap();
        let second = store.fragment_stats(dec_2007()).unwrap();
        let second_row = stored_row();

        assert_eq!(first.rows_per_shard, second.rows_per_shard);
        assert_eq!(first.compressed_rows, second.compressed_rows);
        assert!(first_row.is_some());
        assert_eq!(first_row, second_row);
        assert_eq!(store.get("en/Cat", dec_2007()).unwrap(), Some(data));
    }

    #[test]
    fn test_dimension_checked_before_write() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path(), StoreConfig::writer(4)).unwrap();

        let err = store.put("en/Cat", dec_2007(), &spike(743, 0, 1.0)).unwrap_err();
        assert!(matches!(
            err,
            HourError::Dimension { expected: 744, actual: 743, .. }
        ));
        assert!(store.months().unwrap().is_empty());
        assert!(matches!(
            store.put("", dec_2007(), &spike(744, 0, 1.0)),
            Err(HourError::InvalidName(_))
        ));
    }

    #[test]
    fn test_layout_mismatch_through_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path(), StoreConfig::writer(4)).unwrap();
        store.put("en/Cat", dec_2007(), &spike(744, 0, 9.0)).unwrap();
        store.close().unwrap();

        let path = directory::resolve(temp_dir.path(), dec_2007());
        let before = std::fs::read(&path).unwrap();

        let other = Store::open(temp_dir.path(), StoreConfig::writer(8)).unwrap();
        let err = other.put("en/Dog", dec_2007(), &spike(744, 0, 9.0)).unwrap_err();
        assert!(matches!(err, HourError::SchemaMismatch { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_read_pruning_and_exists() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            read_prune_threshold: Some(10.0),
            ..StoreConfig::writer(4)
        };
        let store = Store::open(temp_dir.path(), config).unwrap();
        store.put("en/Rare", dec_2007(), &spike(744, 5, 3.0)).unwrap();
        store.put("en/Zero", dec_2007(), &SeriesData::zeros(DType::F32, 744)).unwrap();
        store.put("en/Busy", dec_2007(), &spike(744, 5, 30.0)).unwrap();

        let zeros = SeriesData::zeros(DType::F32, 744);
        assert_eq!(store.get("en/Rare", dec_2007()).unwrap(), Some(zeros.clone()));
        assert_eq!(store.get("en/Zero", dec_2007()).unwrap(), Some(zeros));
        assert_eq!(store.get("en/Busy", dec_2007()).unwrap(), Some(spike(744, 5, 30.0)));
        assert_eq!(store.get("en/Never", dec_2007()).unwrap(), None);

        assert!(store.exists("en/Rare", dec_2007()).unwrap());
        assert!(store.exists("en/Zero", dec_2007()).unwrap());
        assert!(!store.exists("en/Never", dec_2007()).unwrap());

        // unpruned reader sees the true content
        let reader = Store::open(temp_dir.path(), StoreConfig::default()).unwrap();
        assert_eq!(reader.get("en/Rare", dec_2007()).unwrap(), Some(spike(744, 5, 3.0)));
    }

    #[test]
    fn test_write_pruning_skips() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            write_prune_threshold: Some(2.0),
            ..StoreConfig::writer(4)
        };
        let store = Store::open(temp_dir.path(), config).unwrap();

        assert_eq!(
            store.put("en/Small", dec_2007(), &spike(744, 0, 1.0)).unwrap(),
            PutOutcome::Skipped
        );
        assert!(!store.exists("en/Small", dec_2007()).unwrap());

        let kept = spike(744, 0, 50.0);
        assert!(store.put("en/Cat", dec_2007(), &kept).unwrap().is_written());
        assert_eq!(
            store.put("en/Cat", dec_2007(), &spike(744, 0, 0.5)).unwrap(),
            PutOutcome::Skipped
        );
        assert_eq!(store.get("en/Cat", dec_2007()).unwrap(), Some(kept));
    }

    #[test]
    fn test_hourly_batch_namespace_totals() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path(), StoreConfig::writer(4)).unwrap();

        let mut batch = store.record_hourly("en", dec_2007()).unwrap();
        batch.add("Cat", 0, 3.0).unwrap();
        batch.add("Dog", 0, 2.0).unwrap();
        batch.add("Cat", 5, 1.0).unwrap();
        batch.mark_hour(7).unwrap();
        assert!(batch.add("Cat", 744, 1.0).is_err());
        assert_eq!(batch.commit().unwrap(), 2);

        let totals = store.get_namespace_total("en", dec_2007()).unwrap();
        assert_eq!(totals.len(), 744);
        assert_eq!(totals[0], 5.0);
        assert_eq!(totals[5], 1.0);
        assert_eq!(totals[7], 0.0);
        assert!(totals[1].is_nan());
        assert_eq!(totals.iter().filter(|t| !t.is_nan()).count(), 3);

        let cat = store.get("en/Cat", dec_2007()).unwrap().unwrap();
        assert_eq!(cat.get_f64(0), Some(3.0));
        assert_eq!(cat.get_f64(5), Some(1.0));
        assert_eq!(cat.total(), 4.0);
    }

    #[test]
    fn test_namespace_total_absent_and_mistyped() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path(), StoreConfig::writer(4)).unwrap();

        let absent = store.get_namespace_total("en", dec_2007()).unwrap();
        assert_eq!(absent.len(), 744);
        assert!(absent.iter().all(|t| t.is_nan()));

        store.put("fr", dec_2007(), &spike(744, 0, 1.0)).unwrap();
        assert!(matches!(
            store.get_namespace_total("fr", dec_2007()),
            Err(HourError::DTypeMismatch { expected: 'd', found: 'f', .. })
        ));
    }

    #[test]
    fn test_namespace_totals_not_pruned() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            read_prune_threshold: Some(100.0),
            write_prune_threshold: Some(100.0),
            ..StoreConfig::writer(4)
        };
        let store = Store::open(temp_dir.path(), config).unwrap();
        let mut totals = vec![f64::NAN; 744];
        totals[1] = 2.0;
        store.put_namespace_total("en", dec_2007(), &totals).unwrap();

        let read = store.get_namespace_total("en", dec_2007()).unwrap();
        assert_eq!(read[1], 2.0);
        assert!(read[0].is_nan());
    }

    #[test]
    fn test_iterate_items_shard_then_name_order() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            scan_batch_size: 2,
            ..StoreConfig::writer(4)
        };
        let store = Store::open(temp_dir.path(), config).unwrap();
        let names = ["en/Cat", "en/Dog", "en/Emu", "en/Fox", "en/Gnu", "en/Yak"];
        for name in names {
            store.put(name, dec_2007(), &spike(744, 1, 7.0)).unwrap();
        }
        store.put("de/Katze", dec_2007(), &spike(744, 1, 7.0)).unwrap();
        store.put_namespace_total("en", dec_2007(), &vec![1.0; 744]).unwrap();

        let mut expected: Vec<&str> = names.to_vec();
        expected.sort_by_key(|name| (ShardRouter::new(4).unwrap().route(name), *name));

        let scanned: Vec<String> = store
            .iterate_items("en", dec_2007())
            .unwrap()
            .map(|entry| entry.unwrap().into_result().unwrap().name)
            .collect();
        assert_eq!(scanned, expected);

        let empty = store.iterate_items("en", Month::new(2008, 1).unwrap()).unwrap();
        assert_eq!(empty.count(), 0);
    }

    #[test]
    fn test_corrupt_row_reported_and_scan_continues() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path(), StoreConfig::writer(4)).unwrap();
        store.put("en/Cat", dec_2007(), &spike(744, 0, 9.0)).unwrap();
        store.put("en/Dog", dec_2007(), &spike(744, 0, 9.0)).unwrap();

        let path = directory::resolve(temp_dir.path(), dec_2007());
        let raw = Fragment::open(&path, FragmentLayout::new(4, 744).unwrap(), &FragmentOptions::default())
            .unwrap();
        let bad = Row {
            name: "en/Bad".into(),
            dtype: "f".into(),
            total: 10.0,
            compressed: false,
            data: vec![1, 2, 3],
        };
        raw.put(ShardRouter::new(4).unwrap().route("en/Bad"), &bad).unwrap();

        let entries: Vec<ScanEntry> = store
            .iterate_items("en", dec_2007())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(entries.len(), 3);

        let failed: Vec<&ScanEntry> = entries.iter().filter(|e| e.series().is_none()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name(), "en/Bad");
        match failed[0] {
            ScanEntry::Failed { error, .. } => assert!(error.is_corruption()),
            ScanEntry::Item(_) => unreachable!(),
        }

        assert!(store.get("en/Bad", dec_2007()).unwrap_err().is_corruption());
    }

    #[test]
    fn test_iterate_shard() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path(), StoreConfig::writer(2)).unwrap();
        let names = ["a/1", "a/2", "b/1", "b/2", "c"];
        for name in names {
            store.put(name, dec_2007(), &spike(744, 0, 6.0)).unwrap();
        }

        let mut seen = 0;
        for shard in 0..2 {
            for entry in store.iterate_shard(dec_2007(), shard).unwrap() {
                let series = entry.unwrap().into_result().unwrap();
                assert_eq!(ShardRouter::new(2).unwrap().route(&series.name), shard);
                seen += 1;
            }
        }
        assert_eq!(seen, names.len());
        assert!(store.iterate_shard(dec_2007(), 2).is_err());
    }

    #[test]
    fn test_write_batch_atomic() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path(), StoreConfig::writer(4)).unwrap();
        store.put("en/Keep", dec_2007(), &spike(744, 0, 9.0)).unwrap();

        let result: Result<()> = store.write_batch(dec_2007(), |batch| {
            batch.put("en/A", &spike(744, 0, 9.0))?;
            batch.put("en/B", &spike(744, 0, 9.0))?;
            assert!(batch.get("en/A")?.is_some());
            batch.delete("en/Keep")?;
            batch.put("en/C", &spike(10, 0, 9.0))?;
            Ok(())
        });
        assert!(matches!(result, Err(HourError::Dimension { .. })));
        assert!(store.exists("en/Keep", dec_2007()).unwrap());
        assert!(!store.exists("en/A", dec_2007()).unwrap());
        assert!(!store.exists("en/B", dec_2007()).unwrap());

        let written = store
            .write_batch(dec_2007(), |batch| {
                batch.put("en/A", &spike(744, 0, 9.0))?;
                batch.put("en/B", &spike(744, 0, 9.0))?;
                Ok(2)
            })
            .unwrap();
        assert_eq!(written, 2);
        assert!(store.exists("en/B", dec_2007()).unwrap());
    }

    #[test]
    fn test_store_calls_inside_write_batch_fail_fast() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path(), StoreConfig::writer(4)).unwrap();
        let jan = Month::new(2008, 1).unwrap();
        store.put("en/Cat", dec_2007(), &spike(744, 0, 9.0)).unwrap();

        let result: Result<()> = store.write_batch(dec_2007(), |batch| {
            batch.put("en/Dog", &spike(744, 0, 9.0))?;
            assert!(matches!(store.get("en/Cat", dec_2007()), Err(HourError::Reentrant(_))));
            assert!(matches!(
                store.put("en/Emu", dec_2007(), &spike(744, 0, 9.0)),
                Err(HourError::Reentrant(_))
            ));
            let mut items = store.iterate_items("en", dec_2007())?;
            assert!(matches!(items.next(), Some(Err(HourError::Reentrant(_)))));

            // A different month has its own fragment
            store.put("en/Cat", jan, &spike(744, 0, 9.0))?;
            store.exists("en/Cat", dec_2007()).map(|_| ())
        });
        assert!(matches!(result, Err(HourError::Reentrant(_))));

        assert!(!store.exists("en/Dog", dec_2007()).unwrap());
        assert!(store.exists("en/Cat", jan).unwrap());
    }

    #[test]
    fn test_fetch_span() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path(), StoreConfig::writer(4)).unwrap();
        let jan = Month::new(2015, 1).unwrap();
        let feb = jan.next();
        let mar = feb.next();

        store.put("a", jan, &spike(744, 0, 1.0)).unwrap();
        store.put("a", mar, &spike(744, 743, 2.0)).unwrap();
        let span = store.fetch_span("a", jan, mar).unwrap().unwrap();
        assert_eq!(span.dtype(), DType::F32);
        assert_eq!(span.len(), 744 + 672 + 744);
        assert_eq!(span.get_f64(0), Some(1.0));
        assert_eq!(span.get_f64(744 + 672 + 743), Some(2.0));
        assert_eq!(span.total(), 3.0);

        store.put("b", jan, &spike(744, 0, 1.0)).unwrap();
        store.put("b", feb, &SeriesData::F64(vec![0.25; 672])).unwrap();
        let widened = store.fetch_span("b", jan, mar).unwrap().unwrap();
        assert_eq!(widened.dtype(), DType::F64);
        assert_eq!(widened.get_f64(744), Some(0.25));
        assert_eq!(widened.len(), 744 + 672 + 744);

        assert_eq!(store.fetch_span("missing", jan, mar).unwrap(), None);
    }

    #[test]
    fn test_prune_and_maintenance() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path(), StoreConfig::writer(4)).unwrap();
        store.put("en/Small", dec_2007(), &spike(744, 0, 1.0)).unwrap();
        store.put("en/Large", dec_2007(), &spike(744, 0, 100.0)).unwrap();

        assert_eq!(store.prune(dec_2007(), 10.0).unwrap(), 1);
        assert!(!store.exists("en/Small", dec_2007()).unwrap());
        assert!(store.exists("en/Large", dec_2007()).unwrap());

        store.vacuum(dec_2007()).unwrap();
        assert_eq!(store.fragment_stats(dec_2007()).unwrap().total_rows(), 1);

        let other = Month::new(2008, 1).unwrap();
        assert!(matches!(store.prune(other, 1.0), Err(HourError::FragmentNotFound(_))));
    }

    #[test]
    fn test_shard_count_inferred_from_dataset() {
        let temp_dir = TempDir::new().unwrap();
        let unconfigured = StoreConfig {
            writeable: true,
            ..Default::default()
        };

        let empty = Store::open(temp_dir.path(), unconfigured.clone()).unwrap();
        assert!(matches!(
            empty.put("x", dec_2007(), &spike(744, 0, 9.0)),
            Err(HourError::Config(_))
        ));

        Store::open(temp_dir.path(), StoreConfig::writer(6))
            .unwrap()
            .put("x", dec_2007(), &spike(744, 0, 9.0))
            .unwrap();

        let store = Store::open(temp_dir.path(), unconfigured).unwrap();
        let jan = Month::new(2008, 1).unwrap();
        store.put("x", jan, &spike(744, 0, 9.0)).unwrap();
        assert_eq!(store.fragment_stats(jan).unwrap().shard_count, 6);
        assert_eq!(store.months().unwrap(), vec![dec_2007(), jan]);
    }

    #[test]
    fn test_read_only_store() {
        let temp_dir = TempDir::new().unwrap();
        assert!(Store::open(temp_dir.path().join("absent"), StoreConfig::default()).is_err());

        let reader = Store::open(temp_dir.path(), StoreConfig::default()).unwrap();
        assert_eq!(reader.get("en/Cat", dec_2007()).unwrap(), None);
        assert!(matches!(
            reader.put("en/Cat", dec_2007(), &spike(744, 0, 1.0)),
            Err(HourError::ReadOnly(_))
        ));
        assert!(reader.months().unwrap().is_empty());
    }

    #[test]
    fn test_closed_store_rejects_calls() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path(), StoreConfig::writer(4)).unwrap();
        store.put("en/Cat", dec_2007(), &spike(744, 0, 9.0)).unwrap();

        store.close().unwrap();
        assert!(store.is_closed());
        assert!(matches!(store.get("en/Cat", dec_2007()), Err(HourError::Closed)));
        assert!(matches!(
            store.put("en/Cat", dec_2007(), &spike(744, 0, 9.0)),
            Err(HourError::Closed)
        ));
        assert!(matches!(store.months(), Err(HourError::Closed)));
        assert!(store.close().is_ok());
    }

    #[test]
    fn test_concurrent_writers_and_reader() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_path_buf();
        let month = dec_2007();
        Store::open(&dir, StoreConfig::writer(4))
            .unwrap()
            .put("seed", month, &spike(744, 0, 1.0))
            .unwrap();

        let writers: Vec<_> = (0..2)
            .map(|w| {
                let dir = dir.clone();
                thread::spawn(move || {
                    let store = Store::open(&dir, StoreConfig::writer(4)).unwrap();
                    for i in 0..25 {
                        let data = SeriesData::F32(vec![(w * 100 + i) as f32; 744]);
                        let name = format!("w{}/{}", w, i);
                        loop {
                            match store.put(&name, month, &data) {
                                Ok(_) => break,
                                Err(e) if e.is_retryable() => continue,
                                Err(e) => panic!("write failed: {}", e),
                            }
                        }
                    }
                })
            })
            .collect();

        let reader = {
            let dir = dir.clone();
            thread::spawn(move || {
                let store = Store::open(&dir, StoreConfig::default()).unwrap();
                for _ in 0..20 {
                    for w in 0..2 {
                        for i in 0..25 {
                            match store.get(&format!("w{}/{}", w, i), month) {
                                Ok(Some(data)) => {
                                    let expected = (w * 100 + i) as f64;
                                    assert_eq!(data.len(), 744);
                                    assert!(data.iter_f64().all(|v| v == expected));
                                }
                                Ok(None) => {}
                                Err(e) if e.is_retryable() => {}
                                Err(e) => panic!("read failed: {}", e),
                            }
                        }
                    }
                }
            })
        };

        for handle in writers {
            handle.join().unwrap();
        }
        reader.join().unwrap();

        let store = Store::open(&dir, StoreConfig::default()).unwrap();
        assert_eq!(store.fragment_stats(month).unwrap().total_rows(), 51);
    }
}
