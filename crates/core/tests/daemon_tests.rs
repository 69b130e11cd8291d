//! Integration tests for the collection daemon.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use common::{
    btc, eventually, liquidation, orchestrator, orchestrator_with_stream_backoff, StubVenue,
};
use perpflow_core::{
    Daemon, DaemonConfig, DaemonControl, InMemoryRecordStore, RecordQuery, RecordStore,
};
use perpflow_market_data::{Orchestrator, Record, RecordKind, RetryPolicy, Symbol, Venue};

fn config(venues: Vec<Venue>, buffer: usize) -> DaemonConfig {
    DaemonConfig {
        symbols: vec![btc()],
        venues,
        oi_interval: Duration::from_secs(3600),
        funding_interval: Duration::from_secs(3600),
        liquidation_buffer: buffer,
        shutdown_timeout: Duration::from_secs(5),
        status_interval: Duration::from_millis(50),
    }
}

fn daemon(
    orchestrator: Arc<Orchestrator>,
    config: DaemonConfig,
) -> (Daemon, Arc<InMemoryRecordStore>) {
    let store = Arc::new(InMemoryRecordStore::new());
    (Daemon::new(orchestrator, store.clone(), config), store)
}

fn count(store: &InMemoryRecordStore, kind: RecordKind) -> usize {
    store.records().iter().filter(|r| r.kind() == kind).count()
}

/// Store whose snapshot writes never complete. Liquidation-only batches go
/// through to the inner store.
#[derive(Default)]
struct StallingStore {
    inner: InMemoryRecordStore,
    stalled: AtomicBool,
}

impl StallingStore {
    fn stalled(&self) -> bool {
        self.stalled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for StallingStore {
    async fn write(&self, records: &[Record]) -> perpflow_core::Result<usize> {
        if records.iter().any(|r| r.kind() != RecordKind::Liquidation) {
            self.stalled.store(true, Ordering::SeqCst);
            futures::future::pending::<()>().await;
        }
        self.inner.write(records).await
    }

    async fn read(&self, query: &RecordQuery) -> perpflow_core::Result<Vec<Record>> {
        self.inner.read(query).await
    }

    async fn last_timestamp(
        &self,
        kind: RecordKind,
        symbol: &Symbol,
        venue: Venue,
    ) -> perpflow_core::Result<Option<DateTime<Utc>>> {
        self.inner.last_timestamp(kind, symbol, venue).await
    }

    async fn partitions(
        &self,
        kind: RecordKind,
        symbol: &Symbol,
    ) -> perpflow_core::Result<Vec<(Venue, NaiveDate)>> {
        self.inner.partitions(kind, symbol).await
    }
}

// =============================================================================
// Jobs
// =============================================================================

#[tokio::test]
async fn jobs_collect_snapshots_on_start() {
    let binance = StubVenue::new(Venue::Binance);
    let bybit = StubVenue::new(Venue::Bybit);
    let (daemon, store) = daemon(
        orchestrator(&[binance.clone(), bybit.clone()]),
        config(vec![Venue::Binance, Venue::Bybit], 100),
    );

    daemon.start().await.unwrap();
    assert!(daemon.is_running());
    assert!(
        eventually(|| {
            count(&store, RecordKind::OpenInterest) == 2
                && count(&store, RecordKind::FundingRate) == 2
        })
        .await
    );

    let status = daemon.stop().await.unwrap();
    assert!(!status.running);
    assert_eq!(status.fetch_count, 4);
    assert_eq!(status.error_count, 0);
    assert!(status.last_fetch_time.is_some());
    assert_eq!(binance.closes(), 1);
    assert_eq!(bybit.closes(), 1);
}

#[tokio::test]
async fn failing_venue_is_counted_without_stopping_others() {
    let binance = StubVenue::new(Venue::Binance);
    let bybit = StubVenue::failing(Venue::Bybit);
    let (daemon, store) = daemon(
        orchestrator(&[binance, bybit]),
        config(vec![Venue::Binance, Venue::Bybit], 100),
    );

    daemon.start().await.unwrap();
    assert!(eventually(|| daemon.stats().error_count() >= 2).await);
    assert!(eventually(|| store.len() >= 2).await);

    let status = daemon.stop().await.unwrap();
    assert!(store.records().iter().all(|r| r.venue() == Venue::Binance));
    assert!(status.last_error.unwrap().contains("BYBIT"));
}

#[tokio::test]
async fn start_twice_and_stop_twice_are_harmless() {
    let binance = StubVenue::new(Venue::Binance);
    let (daemon, _) = daemon(
        orchestrator(&[binance.clone()]),
        config(vec![Venue::Binance], 100),
    );

    daemon.start().await.unwrap();
    daemon.start().await.unwrap();
    daemon.stop().await.unwrap();
    let status = daemon.stop().await.unwrap();

    assert!(!status.running);
    assert_eq!(binance.closes(), 1);
}

#[tokio::test]
async fn invalid_config_refuses_to_start() {
    let (daemon, _) = daemon(
        orchestrator(&[StubVenue::new(Venue::Binance)]),
        DaemonConfig {
            symbols: Vec::new(),
            ..config(vec![Venue::Binance], 100)
        },
    );
    assert!(daemon.start().await.is_err());
    assert!(!daemon.is_running());
}

// =============================================================================
// Liquidations
// =============================================================================

#[tokio::test]
async fn liquidations_flush_at_threshold_and_on_stop() {
    let binance = StubVenue::new(Venue::Binance);
    binance.push_liquidations(vec![
        liquidation(Venue::Binance, 0),
        liquidation(Venue::Binance, 1),
        liquidation(Venue::Binance, 2),
    ]);
    let (daemon, store) = daemon(
        orchestrator(&[binance]),
        config(vec![Venue::Binance], 2),
    );

    daemon.start().await.unwrap();
    assert!(eventually(|| count(&store, RecordKind::Liquidation) >= 2).await);

    let status = daemon.stop().await.unwrap();
    assert_eq!(count(&store, RecordKind::Liquidation), 3);
    assert_eq!(status.liquidation_count, 3);
    assert_eq!(status.buffered_liquidations, 0);
}

#[tokio::test]
async fn failed_flush_keeps_liquidations_buffered() {
    let binance = StubVenue::new(Venue::Binance);
    binance.push_liquidations(vec![liquidation(Venue::Binance, 0)]);
    let (daemon, store) = daemon(
        orchestrator(&[binance]),
        config(vec![Venue::Binance], 100),
    );
    store.set_fail_writes(true);

    daemon.start().await.unwrap();
    assert!(eventually(|| daemon.stats().liquidation_count() == 1).await);

    let status = daemon.stop().await.unwrap();
    assert_eq!(status.buffered_liquidations, 1);
    assert!(status.error_count >= 1);
    assert_eq!(count(&store, RecordKind::Liquidation), 0);
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn stop_interrupts_stream_reconnect_backoff() {
    let binance = StubVenue::with_stream_down(Venue::Binance);
    let backoff = RetryPolicy {
        max_retries: 10,
        base_delay: Duration::from_secs(60),
        max_delay: Duration::from_secs(60),
        multiplier: 1.0,
        jitter: false,
    };
    let (daemon, _) = daemon(
        orchestrator_with_stream_backoff(&[binance.clone()], backoff),
        config(vec![Venue::Binance], 100),
    );

    daemon.start().await.unwrap();
    assert!(eventually(|| binance.stream_attempts() == 1).await);

    let started = tokio::time::Instant::now();
    let status = daemon.stop().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!status.running);
    assert_eq!(binance.stream_attempts(), 1);
    assert_eq!(binance.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn stuck_job_is_aborted_at_deadline_and_liquidations_still_flush() {
    let binance = StubVenue::new(Venue::Binance);
    binance.push_liquidations(vec![
        liquidation(Venue::Binance, 0),
        liquidation(Venue::Binance, 1),
    ]);
    let store = Arc::new(StallingStore::default());
    let shutdown_timeout = Duration::from_secs(2);
    let daemon = Daemon::new(
        orchestrator(&[binance.clone()]),
        store.clone(),
        DaemonConfig {
            shutdown_timeout,
            ..config(vec![Venue::Binance], 100)
        },
    );

    daemon.start().await.unwrap();
    assert!(eventually(|| store.stalled() && daemon.stats().liquidation_count() == 2).await);
    assert_eq!(daemon.buffered_liquidations(), 2);

    let started = tokio::time::Instant::now();
    let status = daemon.stop().await.unwrap();

    assert!(started.elapsed() >= shutdown_timeout);
    assert!(started.elapsed() < shutdown_timeout + Duration::from_secs(1));
    assert_eq!(status.buffered_liquidations, 0);
    assert_eq!(store.inner.len(), 2);
    assert_eq!(count(&store.inner, RecordKind::Liquidation), 2);
    assert_eq!(binance.closes(), 1);
}

// =============================================================================
// Control
// =============================================================================

#[tokio::test]
async fn stop_marker_ends_run_until() {
    let dir = tempfile::tempdir().unwrap();
    let control = DaemonControl::new(dir.path());
    let (daemon, _) = daemon(
        orchestrator(&[StubVenue::new(Venue::Binance)]),
        config(vec![Venue::Binance], 100),
    );
    let daemon = daemon.with_control(control.clone());

    let requester = control.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        requester.request_stop().unwrap();
    });

    let status = daemon
        .run_until(futures::future::pending::<()>())
        .await
        .unwrap();

    assert!(!status.running);
    assert!(!control.stop_requested());
    let published = control.read_status().unwrap().unwrap();
    assert!(!published.running);
    assert_eq!(published.venues, vec![Venue::Binance]);
}

#[tokio::test]
async fn status_file_is_published_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let control = DaemonControl::new(dir.path());
    let (daemon, _) = daemon(
        orchestrator(&[StubVenue::new(Venue::Binance)]),
        config(vec![Venue::Binance], 100),
    );
    let daemon = daemon.with_control(control.clone());

    daemon.start().await.unwrap();
    assert!(
        eventually(|| matches!(control.read_status(), Ok(Some(status)) if status.running)).await
    );
    daemon.stop().await.unwrap();
}
