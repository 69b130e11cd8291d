//! Telemetry synchronization service.
//!
//! This module provides the `TelemetrySyncService`, which runs fetches
//! through the orchestrator and persists successful results.
//!
//! # Architecture
//!
//! ```text
//! TelemetrySyncService
//!       │
//!       ├─► Orchestrator (fan-out across venues)
//!       └─► RecordStore (persist records, watermarks)
//! ```
//!
//! Incremental syncs resume each venue from its own watermark: the latest
//! stored timestamp plus one millisecond.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use log::{debug, info};
use perpflow_market_data::{
    FetchOperation, FetchResult, Orchestrator, Record, RecordKind, Symbol, Venue,
};

use super::store::RecordStore;
use crate::errors::{Error, Result};

/// Outcome of a sync call.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// One result per venue that was fetched.
    pub results: Vec<FetchResult>,
    /// Records persisted.
    pub written: usize,
    /// Venues already up to date.
    pub skipped: Vec<Venue>,
}

impl SyncReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.success()).count()
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.results.iter().flat_map(|r| r.records.iter())
    }
}

/// Fetch-and-store service over an [`Orchestrator`] and a [`RecordStore`].
pub struct TelemetrySyncService {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn RecordStore>,
}

impl TelemetrySyncService {
    pub fn new(orchestrator: Arc<Orchestrator>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            orchestrator,
            store,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Current snapshot of `kind` for `symbol`, optionally persisted.
    pub async fn fetch_snapshot(
        &self,
        kind: RecordKind,
        symbol: &Symbol,
        venues: Option<&[Venue]>,
        persist: bool,
    ) -> Result<SyncReport> {
        let operation = snapshot_operation(kind)?;
        let results = self.orchestrator.fetch(operation, symbol, venues).await;
        self.finish(results, persist).await
    }

    /// History of `kind` for `symbol` in `[start, end]`, optionally persisted.
    pub async fn fetch_history(
        &self,
        kind: RecordKind,
        symbol: &Symbol,
        venues: Option<&[Venue]>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        persist: bool,
    ) -> Result<SyncReport> {
        let operation = history_operation(kind, start, end)?;
        let results = self.orchestrator.fetch(operation, symbol, venues).await;
        self.finish(results, persist).await
    }

    /// Fetch and persist whatever each venue has beyond its stored watermark.
    ///
    /// A venue with no stored data starts at `default_start`. Venues whose
    /// resume point lies after `end` are skipped.
    pub async fn sync_incremental(
        &self,
        kind: RecordKind,
        symbol: &Symbol,
        venues: Option<&[Venue]>,
        default_start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SyncReport> {
        history_operation(kind, default_start, end)?;
        let venues: Vec<Venue> = match venues {
            Some(venues) => venues.to_vec(),
            None => self.orchestrator.venues(),
        };

        let mut plan = Vec::with_capacity(venues.len());
        for venue in venues {
            let start = self
                .resume_point(kind, symbol, venue)
                .await?
                .unwrap_or(default_start);
            plan.push((venue, start));
        }

        let mut report = SyncReport::default();
        let mut fetches = Vec::new();
        for (venue, start) in plan {
            if start > end {
                debug!("{} {} for {} is up to date", venue, kind, symbol);
                report.skipped.push(venue);
                continue;
            }
            info!(
                "Incremental {} sync for {} on {} from {}",
                kind, symbol, venue, start
            );
            let operation = history_operation(kind, start, end)?;
            fetches.push(async move {
                self.orchestrator
                    .fetch(operation, symbol, Some(&[venue][..]))
                    .await
            });
        }

        let results: Vec<FetchResult> = join_all(fetches).await.into_iter().flatten().collect();
        report.written = self.persist(&results).await?;
        report.results = results;
        Ok(report)
    }

    /// Where an incremental fetch for `venue` resumes: one millisecond after
    /// the stored watermark, or `None` when nothing is stored.
    pub async fn resume_point(
        &self,
        kind: RecordKind,
        symbol: &Symbol,
        venue: Venue,
    ) -> Result<Option<DateTime<Utc>>> {
        let watermark = self.store.last_timestamp(kind, symbol, venue).await?;
        Ok(watermark.map(|ts| ts + TimeDelta::milliseconds(1)))
    }

    /// Write the records of every successful result.
    pub async fn persist(&self, results: &[FetchResult]) -> Result<usize> {
        let records: Vec<Record> = results
            .iter()
            .filter(|r| r.success())
            .flat_map(|r| r.records.iter().cloned())
            .collect();
        if records.is_empty() {
            return Ok(0);
        }
        let written = self.store.write(&records).await?;
        debug!("Persisted {} record(s)", written);
        Ok(written)
    }

    async fn finish(&self, results: Vec<FetchResult>, persist: bool) -> Result<SyncReport> {
        let written = if persist {
            self.persist(&results).await?
        } else {
            0
        };
        Ok(SyncReport {
            results,
            written,
            skipped: Vec::new(),
        })
    }
}

/// Snapshot operation for a record kind.
pub fn snapshot_operation(kind: RecordKind) -> Result<FetchOperation> {
    match kind {
        RecordKind::OpenInterest => Ok(FetchOperation::OpenInterest),
        RecordKind::FundingRate => Ok(FetchOperation::FundingRate),
        RecordKind::Liquidation => Err(Error::Unsupported(
            "liquidations are streamed, not fetched".to_string(),
        )),
    }
}

/// History operation for a record kind over `[start, end]`.
pub fn history_operation(
    kind: RecordKind,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<FetchOperation> {
    if start > end {
        return Err(Error::Config(format!(
            "history range start {} is after end {}",
            start, end
        )));
    }
    match kind {
        RecordKind::OpenInterest => Ok(FetchOperation::OpenInterestHistory { start, end }),
        RecordKind::FundingRate => Ok(FetchOperation::FundingRateHistory { start, end }),
        RecordKind::Liquidation => Err(Error::Unsupported(
            "liquidation history is not available".to_string(),
        )),
    }
}
