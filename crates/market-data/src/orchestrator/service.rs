//! Fan-out of logical requests across venue fetchers.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{join_all, BoxFuture, FutureExt};
use futures::TryStreamExt;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::operation::FetchOperation;
use super::result::FetchResult;
use super::validator::RecordValidator;
use crate::errors::FetchError;
use crate::models::{OperationKind, Record, Symbol, Venue};
use crate::provider::Fetcher;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitSnapshot,
    LiquidationHandler, RetryExecutor, RetryPolicy,
};

/// Default per-attempt timeout for snapshot calls.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Orchestrator configuration.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Retry policy for request/response calls.
    pub retry: RetryPolicy,
    /// Backoff for reconnecting liquidation streams.
    pub stream_backoff: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Per-attempt timeout for snapshot calls.
    pub call_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            stream_backoff: RetryPolicy::stream_default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// How one venue's liquidation stream ended.
#[derive(Debug)]
pub struct StreamOutcome {
    pub venue: Venue,
    pub result: Result<(), FetchError>,
}

/// Fans requests out to every configured venue and gathers the results.
///
/// One venue's failure never aborts the others: each venue's outcome is
/// reported in its own [`FetchResult`]. Every venue call runs under the
/// retry policy, and each attempt passes through the circuit breaker for
/// its (venue, operation) pair.
pub struct Orchestrator {
    fetchers: Vec<Arc<dyn Fetcher>>,
    config: OrchestratorConfig,
    breakers: CircuitBreakerRegistry,
    validator: RecordValidator,
    connected: Mutex<HashSet<Venue>>,
    root: CancellationToken,
}

impl Orchestrator {
    pub fn new(fetchers: Vec<Arc<dyn Fetcher>>) -> Self {
        Self::with_config(fetchers, OrchestratorConfig::default())
    }

    /// Build an orchestrator. A second fetcher for an already registered
    /// venue is ignored.
    pub fn with_config(fetchers: Vec<Arc<dyn Fetcher>>, config: OrchestratorConfig) -> Self {
        let mut seen = HashSet::new();
        let fetchers = fetchers
            .into_iter()
            .filter(|fetcher| {
                let venue = fetcher.venue();
                if seen.insert(venue) {
                    true
                } else {
                    warn!("Duplicate fetcher for {}, keeping the first", venue);
                    false
                }
            })
            .collect();
        Self {
            fetchers,
            breakers: CircuitBreakerRegistry::new(config.circuit_breaker.clone()),
            config,
            validator: RecordValidator::new(),
            connected: Mutex::new(HashSet::new()),
            root: CancellationToken::new(),
        }
    }

    pub fn with_validator(mut self, validator: RecordValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Configured venues in registration order.
    pub fn venues(&self) -> Vec<Venue> {
        self.fetchers.iter().map(|f| f.venue()).collect()
    }

    pub fn fetcher(&self, venue: Venue) -> Option<&Arc<dyn Fetcher>> {
        self.fetchers.iter().find(|f| f.venue() == venue)
    }

    /// Root token; [`fetch`](Self::fetch) derives its child tokens from it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Cancel every fetch started through [`fetch`](Self::fetch).
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// Connect every venue that is not connected yet.
    ///
    /// Venues connect concurrently; a failure is logged and the venue is
    /// tried again on the next call.
    pub async fn connect_all(&self) -> Vec<(Venue, Result<(), FetchError>)> {
        let mut connected = self.connected.lock().await;
        let pending: Vec<&Arc<dyn Fetcher>> = self
            .fetchers
            .iter()
            .filter(|f| !connected.contains(&f.venue()))
            .collect();
        if pending.is_empty() {
            return Vec::new();
        }

        let outcomes = join_all(
            pending
                .into_iter()
                .map(|fetcher| async move { (fetcher.venue(), fetcher.connect().await) }),
        )
        .await;
        for (venue, result) in &outcomes {
            match result {
                Ok(()) => {
                    connected.insert(*venue);
                }
                Err(e) => warn!("Failed to connect to {}: {}", venue, e),
            }
        }
        outcomes
    }

    /// Close every venue. Safe to call repeatedly.
    pub async fn close_all(&self) -> Vec<(Venue, Result<(), FetchError>)> {
        let mut connected = self.connected.lock().await;
        let outcomes = join_all(
            self.fetchers
                .iter()
                .map(|fetcher| async move { (fetcher.venue(), fetcher.close().await) }),
        )
        .await;
        for (venue, result) in &outcomes {
            if let Err(e) = result {
                warn!("Failed to close {}: {}", venue, e);
            }
        }
        connected.clear();
        debug!("Closed {} venue(s)", outcomes.len());
        outcomes
    }

    /// Fetch `operation` for `symbol` from `venues` (all when `None`).
    ///
    /// Returns one result per targeted venue, in target order. Never fails.
    pub async fn fetch(
        &self,
        operation: FetchOperation,
        symbol: &Symbol,
        venues: Option<&[Venue]>,
    ) -> Vec<FetchResult> {
        let cancel = self.root.child_token();
        self.fetch_with_cancel(operation, symbol, venues, &cancel)
            .await
    }

    /// [`fetch`](Self::fetch) observing an explicit cancellation token.
    pub async fn fetch_with_cancel(
        &self,
        operation: FetchOperation,
        symbol: &Symbol,
        venues: Option<&[Venue]>,
        cancel: &CancellationToken,
    ) -> Vec<FetchResult> {
        self.connect_all().await;
        let targets = self.targets(venues);
        debug!(
            "Fetching {} for {} from {} venue(s)",
            operation,
            symbol,
            targets.len()
        );

        join_all(targets.into_iter().map(|target| async move {
            match target {
                Ok(fetcher) => self.fetch_one(fetcher, operation, symbol, cancel).await,
                Err(venue) => FetchResult::failed(
                    venue,
                    symbol.clone(),
                    operation.kind(),
                    FetchError::VenueNotConfigured(venue),
                    Duration::ZERO,
                ),
            }
        }))
        .await
    }

    /// Stream liquidations for `symbol` from `venues` (all when `None`)
    /// into `handler` until `cancel` fires.
    ///
    /// One task runs per venue. Returns once every task has finished, with
    /// one outcome per targeted venue.
    pub async fn stream_liquidations(
        &self,
        symbol: &Symbol,
        handler: LiquidationHandler,
        venues: Option<&[Venue]>,
        cancel: &CancellationToken,
    ) -> Vec<StreamOutcome> {
        self.connect_all().await;

        let mut outcomes = Vec::new();
        let mut running = Vec::new();
        let mut tasks = JoinSet::new();
        for target in self.targets(venues) {
            let fetcher = match target {
                Ok(fetcher) => Arc::clone(fetcher),
                Err(venue) => {
                    outcomes.push(StreamOutcome {
                        venue,
                        result: Err(FetchError::VenueNotConfigured(venue)),
                    });
                    continue;
                }
            };
            let venue = fetcher.venue();
            if !fetcher.capabilities().supports_liquidation_stream {
                info!("{} has no liquidation stream, skipping", venue);
                outcomes.push(StreamOutcome {
                    venue,
                    result: Err(FetchError::NotSupported(format!(
                        "liquidation stream on {}",
                        venue
                    ))),
                });
                continue;
            }

            let symbol = symbol.clone();
            let handler = Arc::clone(&handler);
            let backoff = self.config.stream_backoff.clone();
            let token = cancel.child_token();
            running.push(venue);
            tasks.spawn(async move {
                let result = fetcher
                    .stream_liquidations(&symbol, handler, &backoff, &token)
                    .await;
                (venue, result)
            });
        }
        info!(
            "Streaming {} liquidations from {} venue(s)",
            symbol,
            running.len()
        );

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((venue, result)) => {
                    match &result {
                        Ok(()) => info!("{} liquidation stream for {} stopped", venue, symbol),
                        Err(e) => {
                            error!("{} liquidation stream for {} failed: {}", venue, symbol, e)
                        }
                    }
                    running.retain(|v| *v != venue);
                    outcomes.push(StreamOutcome { venue, result });
                }
                Err(e) => error!("Liquidation stream task for {} died: {}", symbol, e),
            }
        }
        for venue in running {
            outcomes.push(StreamOutcome {
                venue,
                result: Err(FetchError::ConnectionClosed(
                    "stream task terminated abnormally".to_string(),
                )),
            });
        }
        outcomes
    }

    /// Snapshots of every circuit breaker used so far.
    pub fn circuit_snapshots(&self) -> Vec<CircuitSnapshot> {
        self.breakers.snapshots()
    }

    /// Force a breaker back to closed. Returns false if it was never used.
    pub fn reset_circuit(&self, venue: Venue, operation: OperationKind) -> bool {
        let reset = self.breakers.reset(venue, operation);
        if reset {
            info!("Circuit {}:{} reset by operator", venue, operation);
        }
        reset
    }

    /// Resolve the requested venues. Unknown venues come back as `Err`.
    fn targets(&self, venues: Option<&[Venue]>) -> Vec<Result<&Arc<dyn Fetcher>, Venue>> {
        match venues {
            None => self.fetchers.iter().map(Ok).collect(),
            Some(venues) => {
                let mut seen = HashSet::new();
                venues
                    .iter()
                    .filter(|venue| seen.insert(**venue))
                    .map(|venue| self.fetcher(*venue).ok_or(*venue))
                    .collect()
            }
        }
    }

    async fn fetch_one(
        &self,
        fetcher: &Arc<dyn Fetcher>,
        operation: FetchOperation,
        symbol: &Symbol,
        cancel: &CancellationToken,
    ) -> FetchResult {
        let venue = fetcher.venue();
        let kind = operation.kind();
        let started = Instant::now();

        if !fetcher.capabilities().supports(kind) {
            debug!("{} does not support {}", venue, kind);
            return FetchResult::failed(
                venue,
                symbol.clone(),
                kind,
                FetchError::NotSupported(format!("{} on {}", kind, venue)),
                started.elapsed(),
            );
        }

        match self.call_venue(fetcher, operation, symbol, cancel).await {
            Ok(records) => {
                let (records, rejected) = self.validator.retain_valid(venue, symbol, records);
                debug!(
                    "{} {} for {}: {} record(s) in {:?}",
                    venue,
                    kind,
                    symbol,
                    records.len(),
                    started.elapsed()
                );
                FetchResult::succeeded(
                    venue,
                    symbol.clone(),
                    kind,
                    records,
                    rejected,
                    started.elapsed(),
                )
            }
            Err(e) => {
                warn!("{} {} for {} failed: {}", venue, operation, symbol, e);
                FetchResult::failed(venue, symbol.clone(), kind, e, started.elapsed())
            }
        }
    }

    /// One venue call: retries wrap the breaker, the breaker wraps each attempt.
    async fn call_venue(
        &self,
        fetcher: &Arc<dyn Fetcher>,
        operation: FetchOperation,
        symbol: &Symbol,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>, FetchError> {
        let venue = fetcher.venue();
        let breaker_handle = self.breakers.get(venue, operation.kind());
        let breaker: &CircuitBreaker = &breaker_handle;
        let target: &dyn Fetcher = fetcher.as_ref();
        let reconnect_target = Arc::clone(fetcher);
        let timeout = self.config.call_timeout;

        RetryExecutor::new(
            &self.config.retry,
            format!("{} {} {}", venue, operation.kind(), symbol),
        )
        .with_cancellation(cancel.clone())
        .on_reconnect(move || reconnect(Arc::clone(&reconnect_target)))
        .execute(move || breaker.call(move || invoke(target, operation, symbol, timeout)))
        .await
    }
}

fn reconnect<'a>(fetcher: Arc<dyn Fetcher>) -> BoxFuture<'a, Result<(), FetchError>> {
    async move {
        info!("Reconnecting to {}", fetcher.venue());
        fetcher.close().await?;
        fetcher.connect().await
    }
    .boxed()
}

async fn invoke(
    fetcher: &dyn Fetcher,
    operation: FetchOperation,
    symbol: &Symbol,
    timeout: Duration,
) -> Result<Vec<Record>, FetchError> {
    match operation {
        FetchOperation::OpenInterest => {
            let record = with_timeout(timeout, fetcher.fetch_open_interest(symbol)).await?;
            Ok(vec![record.into()])
        }
        FetchOperation::FundingRate => {
            let record = with_timeout(timeout, fetcher.fetch_funding_rate(symbol)).await?;
            Ok(vec![record.into()])
        }
        FetchOperation::OpenInterestHistory { start, end } => {
            fetcher
                .fetch_open_interest_history(symbol, start, end)
                .map_ok(Record::from)
                .try_collect()
                .await
        }
        FetchOperation::FundingRateHistory { start, end } => {
            fetcher
                .fetch_funding_rate_history(symbol, start, end)
                .map_ok(Record::from)
                .try_collect()
                .await
        }
    }
}

async fn with_timeout<T, Fut>(limit: Duration, fut: Fut) -> Result<T, FetchError>
where
    Fut: Future<Output = Result<T, FetchError>>,
{
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        FetchError::Timeout(format!("no response within {:.1}s", limit.as_secs_f64()))
    })?
}
