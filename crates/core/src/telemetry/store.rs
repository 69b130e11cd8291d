//! Record storage traits.
//!
//! This module defines the storage interface for telemetry records. The
//! trait abstracts the persistence layer so services never see files.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use perpflow_market_data::{Record, RecordKind, Symbol, Venue};

use crate::errors::Result;

// =============================================================================
// Record Query
// =============================================================================

/// Filter for [`RecordStore::read`].
///
/// Bounds are inclusive. A missing venue means every venue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordQuery {
    pub kind: RecordKind,
    pub symbol: Symbol,
    pub venue: Option<Venue>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl RecordQuery {
    pub fn new(kind: RecordKind, symbol: Symbol) -> Self {
        Self {
            kind,
            symbol,
            venue: None,
            start: None,
            end: None,
        }
    }

    pub fn venue(mut self, venue: Option<Venue>) -> Self {
        self.venue = venue;
        self
    }

    pub fn start(mut self, start: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self
    }

    pub fn end(mut self, end: Option<DateTime<Utc>>) -> Self {
        self.end = end;
        self
    }

    /// Whether `record` falls inside this query.
    pub fn matches(&self, record: &Record) -> bool {
        record.kind() == self.kind
            && record.symbol() == &self.symbol
            && self.venue.map(|v| record.venue() == v).unwrap_or(true)
            && self.start.map(|s| record.timestamp() >= s).unwrap_or(true)
            && self.end.map(|e| record.timestamp() <= e).unwrap_or(true)
    }
}

// =============================================================================
// Record Store
// =============================================================================

/// Storage interface for telemetry records.
///
/// # Design Notes
///
/// - Records are partitioned by (kind, symbol, venue, UTC date)
/// - `write` appends; the same batch written twice is stored twice
/// - `read` returns records sorted by timestamp
/// - Concurrent writers to one catalog are not supported
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist `records`, returning how many were written.
    ///
    /// Groups are written one partition at a time; a failure leaves groups
    /// written before it in place.
    async fn write(&self, records: &[Record]) -> Result<usize>;

    /// Records matching `query`, ascending by timestamp.
    async fn read(&self, query: &RecordQuery) -> Result<Vec<Record>>;

    /// Latest timestamp stored for a (kind, symbol, venue), looking only at
    /// the most recent partition.
    async fn last_timestamp(
        &self,
        kind: RecordKind,
        symbol: &Symbol,
        venue: Venue,
    ) -> Result<Option<DateTime<Utc>>>;

    /// (venue, date) pairs present for a (kind, symbol).
    async fn partitions(
        &self,
        kind: RecordKind,
        symbol: &Symbol,
    ) -> Result<Vec<(Venue, NaiveDate)>>;
}
