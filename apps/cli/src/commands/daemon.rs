//! `daemon start|status|stop`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{TimeDelta, Utc};
use clap::{Args, Subcommand};
use perpflow_core::constants::DEFAULT_STATUS_INTERVAL;
use perpflow_core::{Daemon, DaemonConfig, DaemonControl};
use perpflow_market_data::Symbol;
use tracing::{error, info, warn};

use super::VenueArgs;
use crate::config::Config;
use crate::main_lib::{build_orchestrator, open_store};
use crate::output;

/// Status older than this many publish intervals is reported as stale.
const STALE_AFTER_INTERVALS: u32 = 3;

#[derive(Subcommand, Debug)]
pub enum DaemonCommands {
    /// Run the collection daemon in the foreground until Ctrl-C or `daemon stop`
    Start(DaemonStartArgs),
    /// Show the status published by a running daemon
    Status,
    /// Ask a running daemon to shut down
    Stop,
}

#[derive(Args, Debug)]
pub struct DaemonStartArgs {
    /// Symbol to collect; repeat for several (default: PERPFLOW_SYMBOLS or BTC and ETH)
    #[arg(short = 's', long = "symbol", value_name = "SYMBOL")]
    pub symbols: Vec<Symbol>,

    #[command(flatten)]
    pub venue: VenueArgs,

    /// Open interest collection interval in minutes
    #[arg(long, value_name = "MINUTES", value_parser = clap::value_parser!(u64).range(1..))]
    pub oi_interval: Option<u64>,

    /// Funding rate collection interval in minutes
    #[arg(long, value_name = "MINUTES", value_parser = clap::value_parser!(u64).range(1..))]
    pub funding_interval: Option<u64>,

    /// Liquidations buffered before each write
    #[arg(long, value_name = "COUNT")]
    pub buffer: Option<usize>,

    /// Seconds allowed for a graceful shutdown
    #[arg(long, value_name = "SECONDS")]
    pub shutdown_timeout: Option<u64>,
}

impl DaemonStartArgs {
    /// `base` with every flag given on the command line applied.
    pub fn apply(&self, mut base: DaemonConfig) -> DaemonConfig {
        if !self.symbols.is_empty() {
            base.symbols = self.symbols.clone();
        }
        let venues = self.venue.venues();
        if !venues.is_empty() {
            base.venues = venues;
        }
        if let Some(minutes) = self.oi_interval {
            base.oi_interval = Duration::from_secs(minutes * 60);
        }
        if let Some(minutes) = self.funding_interval {
            base.funding_interval = Duration::from_secs(minutes * 60);
        }
        if let Some(buffer) = self.buffer {
            base.liquidation_buffer = buffer;
        }
        if let Some(seconds) = self.shutdown_timeout {
            base.shutdown_timeout = Duration::from_secs(seconds);
        }
        base
    }
}

pub async fn execute(command: DaemonCommands, config: &Config) -> Result<()> {
    let control = DaemonControl::new(&config.catalog_path);
    match command {
        DaemonCommands::Start(args) => start(args, config, control).await,
        DaemonCommands::Status => status(&control),
        DaemonCommands::Stop => stop(&control),
    }
}

async fn start(args: DaemonStartArgs, config: &Config, control: DaemonControl) -> Result<()> {
    let daemon_config = args.apply(config.daemon_config());
    daemon_config.validate()?;

    if let Some(previous) = control.read_status()? {
        if previous.running && !is_stale(&previous.updated_at) {
            warn!(
                "Status file says pid {} is already running against this catalog",
                previous.pid
            );
        }
    }

    let orchestrator = build_orchestrator(config, &daemon_config.venues);
    let store = open_store(config)?;
    info!(
        "Starting daemon for {} symbol(s) on {} venue(s), catalog {}",
        daemon_config.symbols.len(),
        daemon_config.venues.len(),
        config.catalog_path.display()
    );

    let daemon = Daemon::new(Arc::clone(&orchestrator), store, daemon_config).with_control(control);
    let status = daemon.run_until(shutdown_signal()).await?;

    info!(
        "Daemon stopped after {}s: {} fetch(es), {} error(s), {} liquidation(s)",
        status.uptime_seconds, status.fetch_count, status.error_count, status.liquidation_count
    );
    if status.buffered_liquidations > 0 {
        error!(
            "{} liquidation(s) could not be written before shutdown",
            status.buffered_liquidations
        );
    }
    Ok(())
}

fn status(control: &DaemonControl) -> Result<()> {
    let Some(status) = control.read_status()? else {
        println!("No daemon status found in {}", control.dir().display());
        return Ok(());
    };
    let stale = status.running && is_stale(&status.updated_at);
    output::print_daemon_status(&status, stale);
    Ok(())
}

fn stop(control: &DaemonControl) -> Result<()> {
    match control.read_status()? {
        Some(status) if status.running => {}
        _ => bail!("no running daemon found in {}", control.dir().display()),
    }
    control.request_stop()?;
    println!("Stop requested; the daemon exits within its shutdown timeout");
    Ok(())
}

fn is_stale(updated_at: &chrono::DateTime<Utc>) -> bool {
    let budget = TimeDelta::from_std(DEFAULT_STATUS_INTERVAL * STALE_AFTER_INTERVALS)
        .unwrap_or(TimeDelta::MAX);
    Utc::now() - *updated_at > budget
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
