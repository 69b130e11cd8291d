//! Partition keys and their on-disk layout.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use perpflow_market_data::{Record, RecordKind, Symbol, Venue};

/// File extension of partition files.
pub const PARTITION_EXT: &str = "csv";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Identifies one partition: `(kind, symbol, venue, UTC date)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub kind: RecordKind,
    pub symbol: Symbol,
    pub venue: Venue,
    pub date: NaiveDate,
}

impl PartitionKey {
    pub fn new(kind: RecordKind, symbol: Symbol, venue: Venue, date: NaiveDate) -> Self {
        Self {
            kind,
            symbol,
            venue,
            date,
        }
    }

    /// The partition `record` belongs to.
    pub fn of(record: &Record) -> Self {
        Self::new(
            record.kind(),
            record.symbol().clone(),
            record.venue(),
            record.timestamp().date_naive(),
        )
    }

    /// `<root>/<kind>/<SYMBOL>.<VENUE>`
    pub fn series_dir(root: &Path, kind: RecordKind, symbol: &Symbol, venue: Venue) -> PathBuf {
        root.join(kind.dir_name()).join(format!("{}.{}", symbol, venue))
    }

    /// `<root>/<kind>/<SYMBOL>.<VENUE>/<YYYY-MM-DD>.csv`
    pub fn path(&self, root: &Path) -> PathBuf {
        Self::series_dir(root, self.kind, &self.symbol, self.venue).join(format!(
            "{}.{}",
            self.date.format(DATE_FORMAT),
            PARTITION_EXT
        ))
    }

    /// Parse a series directory name back into its symbol and venue.
    pub fn parse_series_dir(name: &str) -> Option<(Symbol, Venue)> {
        let (symbol, venue) = name.rsplit_once('.')?;
        Some((Symbol::new(symbol).ok()?, venue.parse().ok()?))
    }

    /// Parse a partition file name (`2024-05-01.csv`) into its date.
    pub fn parse_file_name(name: &str) -> Option<NaiveDate> {
        let stem = name.strip_suffix(PARTITION_EXT)?.strip_suffix('.')?;
        NaiveDate::parse_from_str(stem, DATE_FORMAT).ok()
    }
}
