//! Shared test venue for the core integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use perpflow_market_data::{
    FetchError, Fetcher, FetcherCapabilities, FundingRate, Liquidation, OpenInterest,
    Orchestrator, OrchestratorConfig, RetryPolicy, Side, Symbol, Venue,
};
use rust_decimal_macros::dec;

/// Scriptable venue: snapshots succeed unless `fail` is set, history emits
/// points every five minutes from the requested start, and liquidations are
/// replayed from a queue unless the stream is marked down.
pub struct StubVenue {
    venue: Venue,
    fail: AtomicBool,
    stream_down: AtomicBool,
    stream_attempts: AtomicUsize,
    history_requests: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    liquidations: Mutex<VecDeque<Vec<Liquidation>>>,
    snapshot_calls: AtomicUsize,
    closes: AtomicUsize,
}

impl StubVenue {
    pub fn new(venue: Venue) -> Arc<Self> {
        Arc::new(Self {
            venue,
            fail: AtomicBool::new(false),
            stream_down: AtomicBool::new(false),
            stream_attempts: AtomicUsize::new(0),
            history_requests: Mutex::new(Vec::new()),
            liquidations: Mutex::new(VecDeque::new()),
            snapshot_calls: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn failing(venue: Venue) -> Arc<Self> {
        let stub = Self::new(venue);
        stub.fail.store(true, Ordering::SeqCst);
        stub
    }

    /// Every liquidation watch fails with a network error.
    pub fn with_stream_down(venue: Venue) -> Arc<Self> {
        let stub = Self::new(venue);
        stub.stream_down.store(true, Ordering::SeqCst);
        stub
    }

    pub fn stream_attempts(&self) -> usize {
        self.stream_attempts.load(Ordering::SeqCst)
    }

    pub fn push_liquidations(&self, batch: Vec<Liquidation>) {
        self.liquidations.lock().unwrap().push_back(batch);
    }

    pub fn history_requests(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        self.history_requests.lock().unwrap().clone()
    }

    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), FetchError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(FetchError::Authentication(format!("{} rejected the key", self.venue)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Fetcher for StubVenue {
    fn venue(&self) -> Venue {
        self.venue
    }

    fn capabilities(&self) -> FetcherCapabilities {
        FetcherCapabilities::default()
    }

    async fn close(&self) -> Result<(), FetchError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_open_interest(&self, symbol: &Symbol) -> Result<OpenInterest, FetchError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let ts = Utc::now() - TimeDelta::seconds(30);
        Ok(OpenInterest::new(ts, symbol.clone(), self.venue, dec!(1500), dec!(90000000))?)
    }

    async fn fetch_funding_rate(&self, symbol: &Symbol) -> Result<FundingRate, FetchError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let ts = Utc::now() - TimeDelta::seconds(30);
        Ok(FundingRate::new(ts, symbol.clone(), self.venue, dec!(0.0001))?)
    }

    fn fetch_open_interest_history<'a>(
        &'a self,
        symbol: &'a Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxStream<'a, Result<OpenInterest, FetchError>> {
        self.history_requests.lock().unwrap().push((start, end));
        if let Err(e) = self.check() {
            return stream::once(async move { Err(e) }).boxed();
        }
        let venue = self.venue;
        let items: Vec<Result<OpenInterest, FetchError>> = (0..)
            .map(|i| start + TimeDelta::minutes(5 * i))
            .take_while(|ts| *ts <= end)
            .map(|ts| {
                OpenInterest::new(ts, symbol.clone(), venue, dec!(10), dec!(600000))
                    .map_err(FetchError::from)
            })
            .collect();
        stream::iter(items).boxed()
    }

    async fn watch_liquidations(&self, _symbol: &Symbol) -> Result<Vec<Liquidation>, FetchError> {
        self.stream_attempts.fetch_add(1, Ordering::SeqCst);
        if self.stream_down.load(Ordering::SeqCst) {
            return Err(FetchError::Network(format!("{} feed unreachable", self.venue)));
        }
        let next = self.liquidations.lock().unwrap().pop_front();
        match next {
            Some(batch) => Ok(batch),
            None => futures::future::pending().await,
        }
    }
}

pub fn btc() -> Symbol {
    Symbol::new("BTCUSDT-PERP").unwrap()
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

pub fn liquidation(venue: Venue, offset_secs: i64) -> Liquidation {
    Liquidation::new(
        t0() + TimeDelta::seconds(offset_secs),
        btc(),
        venue,
        Side::Short,
        dec!(0.25),
        dec!(62000),
    )
    .unwrap()
}

pub fn orchestrator(venues: &[Arc<StubVenue>]) -> Arc<Orchestrator> {
    orchestrator_with_stream_backoff(venues, RetryPolicy::stream_default())
}

pub fn orchestrator_with_stream_backoff(
    venues: &[Arc<StubVenue>],
    stream_backoff: RetryPolicy,
) -> Arc<Orchestrator> {
    let fetchers: Vec<Arc<dyn Fetcher>> = venues
        .iter()
        .map(|v| Arc::clone(v) as Arc<dyn Fetcher>)
        .collect();
    let config = OrchestratorConfig {
        retry: RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
            jitter: false,
        },
        stream_backoff,
        ..OrchestratorConfig::default()
    };
    Arc::new(Orchestrator::with_config(fetchers, config))
}

/// Poll `condition` every 10ms for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
