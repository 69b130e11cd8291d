use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info};
use perpflow_core::errors::{Error, Result};
use perpflow_core::telemetry::{RecordQuery, RecordStore};
use perpflow_market_data::{Record, RecordKind, Symbol, Venue};

use super::model::{FundingRateRow, LiquidationRow, OpenInterestRow, PartitionRow};
use super::partition::PartitionKey;
use crate::errors::StorageError;

type StorageResult<T> = std::result::Result<T, StorageError>;

/// [`RecordStore`] over a directory of date-partitioned CSV files.
#[derive(Clone, Debug)]
pub struct CsvRecordStore {
    root: Arc<PathBuf>,
}

impl CsvRecordStore {
    /// Store rooted at `root`. Nothing is touched until the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    /// Store rooted at `root`, creating the catalog directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if root.exists() && !root.is_dir() {
            return Err(StorageError::InvalidCatalog(format!(
                "{} is not a directory",
                root.display()
            ))
            .into());
        }
        fs::create_dir_all(&root).map_err(StorageError::from)?;
        info!("Opened CSV catalog at {}", root.display());
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every record of one partition, in file order.
    pub async fn read_partition(&self, key: PartitionKey) -> Result<Vec<Record>> {
        let root = Arc::clone(&self.root);
        blocking(move || read_partition(&key.path(&root), key.kind)).await
    }
}

/// Run blocking file I/O off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Unexpected(format!("storage task failed: {}", e)))?
        .map_err(Error::from)
}

// =============================================================================
// RecordStore Implementation
// =============================================================================

#[async_trait]
impl RecordStore for CsvRecordStore {
    async fn write(&self, records: &[Record]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let root = Arc::clone(&self.root);
        let records = records.to_vec();
        blocking(move || write_records(&root, records)).await
    }

    async fn read(&self, query: &RecordQuery) -> Result<Vec<Record>> {
        let root = Arc::clone(&self.root);
        let query = query.clone();
        blocking(move || read_records(&root, &query)).await
    }

    async fn last_timestamp(
        &self,
        kind: RecordKind,
        symbol: &Symbol,
        venue: Venue,
    ) -> Result<Option<DateTime<Utc>>> {
        let root = Arc::clone(&self.root);
        let symbol = symbol.clone();
        blocking(move || {
            let dir = PartitionKey::series_dir(&root, kind, &symbol, venue);
            let Some(latest) = partition_dates(&dir)?.pop() else {
                return Ok(None);
            };
            let key = PartitionKey::new(kind, symbol, venue, latest);
            let records = read_partition(&key.path(&root), kind)?;
            Ok(records.iter().map(Record::timestamp).max())
        })
        .await
    }

    async fn partitions(
        &self,
        kind: RecordKind,
        symbol: &Symbol,
    ) -> Result<Vec<(Venue, NaiveDate)>> {
        let root = Arc::clone(&self.root);
        let symbol = symbol.clone();
        blocking(move || {
            let mut found = Vec::new();
            for (venue, dir) in series_dirs(&root, kind, &symbol)? {
                for date in partition_dates(&dir)? {
                    found.push((venue, date));
                }
            }
            found.sort();
            Ok(found)
        })
        .await
    }
}

// =============================================================================
// Partition I/O
// =============================================================================

fn write_records(root: &Path, records: Vec<Record>) -> StorageResult<usize> {
    let mut groups: BTreeMap<PartitionKey, Vec<Record>> = BTreeMap::new();
    for record in records {
        groups.entry(PartitionKey::of(&record)).or_default().push(record);
    }

    let mut written = 0;
    for (key, group) in groups {
        let path = key.path(root);
        let mut rows = read_partition(&path, key.kind)?;
        rows.extend_from_slice(&group);
        rewrite_partition(&path, key.kind, &rows)?;
        debug!(
            "Appended {} record(s) to {} ({} total)",
            group.len(),
            path.display(),
            rows.len()
        );
        written += group.len();
    }
    Ok(written)
}

fn read_records(root: &Path, query: &RecordQuery) -> StorageResult<Vec<Record>> {
    let start_date = query.start.map(|ts| ts.date_naive());
    let end_date = query.end.map(|ts| ts.date_naive());

    let mut matched = Vec::new();
    for (venue, dir) in series_dirs(root, query.kind, &query.symbol)? {
        if query.venue.is_some_and(|v| v != venue) {
            continue;
        }
        for date in partition_dates(&dir)? {
            let before = start_date.is_some_and(|start| date < start);
            let after = end_date.is_some_and(|end| date > end);
            if before || after {
                continue;
            }
            let key = PartitionKey::new(query.kind, query.symbol.clone(), venue, date);
            matched.extend(
                read_partition(&key.path(root), query.kind)?
                    .into_iter()
                    .filter(|record| query.matches(record)),
            );
        }
    }
    matched.sort_by_key(Record::timestamp);
    Ok(matched)
}

/// Records in the partition at `path`; a missing file is an empty partition.
fn read_partition(path: &Path, kind: RecordKind) -> StorageResult<Vec<Record>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut reader = csv::Reader::from_reader(file);
    match kind {
        RecordKind::OpenInterest => decode::<OpenInterestRow>(&mut reader, path),
        RecordKind::FundingRate => decode::<FundingRateRow>(&mut reader, path),
        RecordKind::Liquidation => decode::<LiquidationRow>(&mut reader, path),
    }
}

fn decode<R: PartitionRow>(
    reader: &mut csv::Reader<File>,
    path: &Path,
) -> StorageResult<Vec<Record>> {
    let corrupt = |message: String| StorageError::Corrupt {
        path: path.display().to_string(),
        message,
    };
    reader
        .deserialize::<R>()
        .map(|row| {
            row.map_err(|e| corrupt(e.to_string()))?
                .into_record()
                .map_err(&corrupt)
        })
        .collect()
}

/// Replace the partition at `path` with `records` through a temporary
/// sibling file.
fn rewrite_partition(path: &Path, kind: RecordKind, records: &[Record]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("csv.tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp)?;
        match kind {
            RecordKind::OpenInterest => encode::<OpenInterestRow>(&mut writer, records)?,
            RecordKind::FundingRate => encode::<FundingRateRow>(&mut writer, records)?,
            RecordKind::Liquidation => encode::<LiquidationRow>(&mut writer, records)?,
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn encode<R: PartitionRow>(
    writer: &mut csv::Writer<File>,
    records: &[Record],
) -> StorageResult<()> {
    for row in records.iter().filter_map(R::from_record) {
        writer.serialize(row)?;
    }
    Ok(())
}

// =============================================================================
// Catalog Listing
// =============================================================================

/// Series directories of `symbol` under a kind, one per venue.
fn series_dirs(
    root: &Path,
    kind: RecordKind,
    symbol: &Symbol,
) -> StorageResult<Vec<(Venue, PathBuf)>> {
    let kind_dir = root.join(kind.dir_name());
    let entries = match fs::read_dir(&kind_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some((dir_symbol, venue)) = name.to_str().and_then(PartitionKey::parse_series_dir)
        else {
            continue;
        };
        if &dir_symbol == symbol {
            dirs.push((venue, entry.path()));
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Partition dates present in a series directory, ascending.
fn partition_dates(dir: &Path) -> StorageResult<Vec<NaiveDate>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut dates = Vec::new();
    for entry in entries {
        let entry = entry?;
        if let Some(date) = entry.file_name().to_str().and_then(PartitionKey::parse_file_name) {
            dates.push(date);
        }
    }
    dates.sort();
    Ok(dates)
}
