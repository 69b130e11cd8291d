//! The collection daemon.
//!
//! # Tasks
//!
//! ```text
//! Daemon::start
//!   ├─► open-interest job   (every oi_interval)
//!   ├─► funding-rate job    (every funding_interval)
//!   ├─► liquidation flusher (whenever the buffer fills)
//!   ├─► status writer       (when a control directory is attached)
//!   └─► one liquidation stream per symbol
//! ```
//!
//! `stop()` cancels jobs first, then streams, flushes whatever is still
//! buffered and closes the venue connections. Tasks that outlive the
//! shutdown budget are aborted.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use perpflow_market_data::{
    FetchError, HandlerError, Liquidation, LiquidationHandler, Orchestrator, RecordKind, Symbol,
};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::buffer::LiquidationBuffer;
use super::config::DaemonConfig;
use super::control::DaemonControl;
use super::model::DaemonStatus;
use super::stats::DaemonStats;
use crate::constants::STOP_POLL_INTERVAL;
use crate::errors::Result;
use crate::telemetry::{snapshot_operation, RecordStore};

/// Handles for a started daemon.
struct Running {
    jobs_cancel: CancellationToken,
    streams_cancel: CancellationToken,
    jobs: JoinSet<()>,
    streams: JoinSet<()>,
}

/// Everything a spawned task needs, cheaply cloneable.
#[derive(Clone)]
struct TaskContext {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn RecordStore>,
    config: Arc<DaemonConfig>,
    stats: Arc<DaemonStats>,
    buffer: Arc<LiquidationBuffer>,
}

/// Long-running collector of open interest, funding and liquidations.
pub struct Daemon {
    context: TaskContext,
    control: Option<DaemonControl>,
    running: AtomicBool,
    started_at: Mutex<Option<DateTime<Utc>>>,
    state: tokio::sync::Mutex<Option<Running>>,
}

impl Daemon {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        store: Arc<dyn RecordStore>,
        config: DaemonConfig,
    ) -> Self {
        let buffer = Arc::new(LiquidationBuffer::new(config.liquidation_buffer));
        Self {
            context: TaskContext {
                orchestrator,
                store,
                config: Arc::new(config),
                stats: Arc::new(DaemonStats::new()),
                buffer,
            },
            control: None,
            running: AtomicBool::new(false),
            started_at: Mutex::new(None),
            state: tokio::sync::Mutex::new(None),
        }
    }

    /// Publish status to, and accept stop requests from, `control`.
    pub fn with_control(mut self, control: DaemonControl) -> Self {
        self.control = Some(control);
        self
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.context.config
    }

    pub fn stats(&self) -> &DaemonStats {
        &self.context.stats
    }

    pub fn buffered_liquidations(&self) -> usize {
        self.context.buffer.len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.lock().unwrap_or_else(|poisoned| {
            warn!("Daemon start-time mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn set_started_at(&self, value: Option<DateTime<Utc>>) {
        *self.started_at.lock().unwrap_or_else(|poisoned| {
            warn!("Daemon start-time mutex was poisoned, recovering");
            poisoned.into_inner()
        }) = value;
    }

    /// Spawn the jobs, the flusher and the liquidation streams.
    ///
    /// Starting an already running daemon logs a warning and does nothing.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            warn!("Daemon is already running");
            return Ok(());
        }
        self.context.config.validate()?;

        let started_at = Utc::now();
        let config = &self.context.config;
        info!(
            "Starting daemon for {} symbol(s) on {} venue(s)",
            config.symbols.len(),
            config.venues.len()
        );

        let jobs_cancel = CancellationToken::new();
        let streams_cancel = CancellationToken::new();
        let mut jobs = JoinSet::new();
        let mut streams = JoinSet::new();

        jobs.spawn(self.context.clone().run_job(
            RecordKind::OpenInterest,
            config.oi_interval,
            jobs_cancel.clone(),
        ));
        jobs.spawn(self.context.clone().run_job(
            RecordKind::FundingRate,
            config.funding_interval,
            jobs_cancel.clone(),
        ));
        jobs.spawn(self.context.clone().run_flusher(jobs_cancel.clone()));
        if let Some(control) = &self.control {
            if let Err(e) = control.clear_stop() {
                warn!("Could not clear a stale stop marker: {}", e);
            }
            jobs.spawn(self.context.clone().run_status_writer(
                control.clone(),
                started_at,
                jobs_cancel.clone(),
            ));
        }
        for symbol in &config.symbols {
            streams.spawn(
                self.context
                    .clone()
                    .run_stream(symbol.clone(), streams_cancel.clone()),
            );
        }

        self.set_started_at(Some(started_at));
        self.running.store(true, Ordering::SeqCst);
        *state = Some(Running {
            jobs_cancel,
            streams_cancel,
            jobs,
            streams,
        });
        Ok(())
    }

    /// Stop every task, flush buffered liquidations and close connections.
    ///
    /// Returns the final status. Stopping a daemon that is not running
    /// returns its current status.
    pub async fn stop(&self) -> Result<DaemonStatus> {
        let Some(mut running) = self.state.lock().await.take() else {
            warn!("Daemon is not running");
            return Ok(self.status());
        };
        info!("Stopping daemon");
        let deadline = Instant::now() + self.context.config.shutdown_timeout;

        running.jobs_cancel.cancel();
        drain("job", &mut running.jobs, deadline).await;

        running.streams_cancel.cancel();
        drain("stream", &mut running.streams, deadline).await;

        let flushed = self.context.flush().await;
        if flushed > 0 {
            info!("Flushed {} buffered liquidation(s) on shutdown", flushed);
        }
        let pending = self.context.buffer.len();
        if pending > 0 {
            warn!("{} liquidation(s) could not be written on shutdown", pending);
        }

        for (venue, result) in self.context.orchestrator.close_all().await {
            if let Err(e) = result {
                warn!("Closing {} failed: {}", venue, e);
            }
        }

        self.running.store(false, Ordering::SeqCst);
        let status = self.status();
        if let Some(control) = &self.control {
            if let Err(e) = control.write_status(&status) {
                warn!("Could not write final daemon status: {}", e);
            }
            if let Err(e) = control.clear_stop() {
                warn!("Could not clear the stop marker: {}", e);
            }
        }
        info!(
            "Daemon stopped after {} fetch(es), {} error(s), {} liquidation(s)",
            status.fetch_count, status.error_count, status.liquidation_count
        );
        Ok(status)
    }

    /// Start, wait for `shutdown` or a stop marker, then stop.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<DaemonStatus>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        match &self.control {
            Some(control) => {
                tokio::select! {
                    _ = shutdown => info!("Shutdown signal received"),
                    _ = control.wait_for_stop(STOP_POLL_INTERVAL) => {
                        info!("Stop requested through {}", control.stop_path().display())
                    }
                }
            }
            None => {
                shutdown.await;
                info!("Shutdown signal received");
            }
        }
        self.stop().await
    }

    pub fn status(&self) -> DaemonStatus {
        self.context.status(self.is_running(), self.started_at())
    }
}

/// Wait for `tasks` until `deadline`, then abort whatever is left.
async fn drain(what: &str, tasks: &mut JoinSet<()>, deadline: Instant) {
    let joined = tokio::time::timeout_at(deadline, async {
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!("Daemon {} task panicked: {}", what, e);
                }
            }
        }
    })
    .await;

    if joined.is_err() {
        warn!(
            "{} {} task(s) still running after the shutdown budget, aborting",
            tasks.len(),
            what
        );
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }
}

impl TaskContext {
    async fn run_job(self, kind: RecordKind, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.collect(kind, &cancel).await,
            }
        }
        debug!("{} job stopped", kind);
    }

    /// One job tick: fetch `kind` for every symbol and persist the successes.
    async fn collect(&self, kind: RecordKind, cancel: &CancellationToken) {
        let operation = match snapshot_operation(kind) {
            Ok(operation) => operation,
            Err(e) => {
                error!("{} cannot be collected by a job: {}", kind, e);
                return;
            }
        };

        for symbol in &self.config.symbols {
            if cancel.is_cancelled() {
                return;
            }
            let venues = Some(self.config.venues.as_slice());
            let results = self
                .orchestrator
                .fetch_with_cancel(operation, symbol, venues, cancel)
                .await;

            for result in results {
                match &result.error {
                    None => {
                        self.stats.record_fetch();
                        if result.records.is_empty() {
                            continue;
                        }
                        match self.store.write(&result.records).await {
                            Ok(written) => debug!(
                                "Stored {} {} record(s) for {} from {}",
                                written, kind, symbol, result.venue
                            ),
                            Err(e) => {
                                error!("Storing {} for {} failed: {}", kind, symbol, e);
                                self.stats.record_error(format!(
                                    "storing {} for {} from {}: {}",
                                    kind, symbol, result.venue, e
                                ));
                            }
                        }
                    }
                    Some(FetchError::Cancelled) => {}
                    Some(e) => {
                        warn!("{} {} fetch for {} failed: {}", result.venue, kind, symbol, e);
                        self.stats.record_error(format!(
                            "{} {} for {}: {}",
                            result.venue, kind, symbol, e
                        ));
                    }
                }
            }
        }
    }

    async fn run_flusher(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.buffer.wait_full() => {
                    self.flush().await;
                }
            }
        }
    }

    /// Write everything buffered. A failed batch stays in the buffer.
    async fn flush(&self) -> usize {
        match self.buffer.flush(self.store.as_ref()).await {
            Ok(written) => written,
            Err(e) => {
                error!("Flushing liquidations failed: {}", e);
                self.stats.record_error(format!("flushing liquidations: {}", e));
                0
            }
        }
    }

    async fn run_stream(self, symbol: Symbol, cancel: CancellationToken) {
        let buffer = Arc::clone(&self.buffer);
        let stats = Arc::clone(&self.stats);
        let handler: LiquidationHandler = Arc::new(
            move |liquidation: Liquidation| -> std::result::Result<(), HandlerError> {
                stats.record_liquidations(1);
                buffer.push(liquidation);
                Ok(())
            },
        );

        let venues = Some(self.config.venues.as_slice());
        let outcomes = self
            .orchestrator
            .stream_liquidations(&symbol, handler, venues, &cancel)
            .await;
        for outcome in outcomes {
            match outcome.result {
                Ok(()) | Err(FetchError::NotSupported(_)) | Err(FetchError::Cancelled) => {}
                Err(e) => self.stats.record_error(format!(
                    "{} liquidation stream for {}: {}",
                    outcome.venue, symbol, e
                )),
            }
        }
    }

    async fn run_status_writer(
        self,
        control: DaemonControl,
        started_at: DateTime<Utc>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.config.status_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let status = self.status(true, Some(started_at));
                    if let Err(e) = control.write_status(&status) {
                        warn!("Could not write daemon status: {}", e);
                    }
                }
            }
        }
    }

    fn status(&self, running: bool, started_at: Option<DateTime<Utc>>) -> DaemonStatus {
        let now = Utc::now();
        let uptime_seconds = match (running, started_at) {
            (true, Some(started)) => (now - started).num_seconds().max(0) as u64,
            _ => 0,
        };
        DaemonStatus {
            running,
            pid: std::process::id(),
            started_at,
            uptime_seconds,
            fetch_count: self.stats.fetch_count(),
            error_count: self.stats.error_count(),
            liquidation_count: self.stats.liquidation_count(),
            buffered_liquidations: self.buffer.len(),
            last_error: self.stats.last_error(),
            last_fetch_time: self.stats.last_fetch_time(),
            symbols: self.config.symbols.clone(),
            venues: self.config.venues.clone(),
            circuits: self.orchestrator.circuit_snapshots(),
            updated_at: now,
        }
    }
}
