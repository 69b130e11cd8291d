//! Volatile [`RecordStore`] for tests and dry runs.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use log::warn;
use perpflow_market_data::{Record, RecordKind, Symbol, Venue};

use super::store::{RecordQuery, RecordStore};
use crate::errors::{Result, StorageError};

/// Keeps every written record in memory, in write order.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: Mutex<Vec<Record>>,
    fail_writes: AtomicBool,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_records(&self) -> MutexGuard<'_, Vec<Record>> {
        self.records.lock().unwrap_or_else(|poisoned| {
            warn!("In-memory record store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Make subsequent writes fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_records().is_empty()
    }

    /// Copy of everything written so far.
    pub fn records(&self) -> Vec<Record> {
        self.lock_records().clone()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn write(&self, records: &[Record]) -> Result<usize> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io("simulated write failure".to_string()).into());
        }
        self.lock_records().extend_from_slice(records);
        Ok(records.len())
    }

    async fn read(&self, query: &RecordQuery) -> Result<Vec<Record>> {
        let mut matched: Vec<Record> = self
            .lock_records()
            .iter()
            .filter(|record| query.matches(record))
            .cloned()
            .collect();
        matched.sort_by_key(Record::timestamp);
        Ok(matched)
    }

    async fn last_timestamp(
        &self,
        kind: RecordKind,
        symbol: &Symbol,
        venue: Venue,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .lock_records()
            .iter()
            .filter(|r| r.kind() == kind && r.symbol() == symbol && r.venue() == venue)
            .map(Record::timestamp)
            .max())
    }

    async fn partitions(
        &self,
        kind: RecordKind,
        symbol: &Symbol,
    ) -> Result<Vec<(Venue, NaiveDate)>> {
        let keys: BTreeSet<(Venue, NaiveDate)> = self
            .lock_records()
            .iter()
            .filter(|r| r.kind() == kind && r.symbol() == symbol)
            .map(|r| (r.venue(), r.timestamp().date_naive()))
            .collect();
        Ok(keys.into_iter().collect())
    }
}
