//! `fetch-oi` / `fetch-funding`

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use clap::Args;
use perpflow_core::constants::DEFAULT_BACKFILL;
use perpflow_core::{InMemoryRecordStore, RecordStore, SyncReport, TelemetrySyncService};
use perpflow_market_data::{RecordKind, Symbol};
use tracing::{info, warn};

use super::time::parse_range;
use super::VenueArgs;
use crate::config::Config;
use crate::main_lib::{build_orchestrator, open_store, venue_filter};
use crate::output;

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Canonical symbol, e.g. BTCUSDT-PERP
    pub symbol: Symbol,

    #[command(flatten)]
    pub venue: VenueArgs,

    /// Persist fetched records to the catalog
    #[arg(long)]
    pub store: bool,

    /// History start (YYYY-MM-DD, YYYY-MM-DDTHH:MM:SS or RFC 3339)
    #[arg(long)]
    pub from: Option<String>,

    /// History end; a bare date means the end of that day (default: now)
    #[arg(long)]
    pub to: Option<String>,

    /// Resume each venue after its latest stored record and store the result
    #[arg(long)]
    pub incremental: bool,
}

enum Plan {
    Snapshot,
    History(DateTime<Utc>),
    Incremental(DateTime<Utc>),
}

pub async fn execute(kind: RecordKind, args: FetchArgs, config: &Config) -> Result<()> {
    let (from, end) = parse_range(args.from.as_deref(), args.to.as_deref())?;
    let backfill = TimeDelta::from_std(DEFAULT_BACKFILL)?;
    let plan = match (args.incremental, from) {
        (true, from) => Plan::Incremental(from.unwrap_or(end - backfill)),
        (false, Some(from)) => Plan::History(from),
        (false, None) => Plan::Snapshot,
    };

    let venues = args.venue.venues();
    let orchestrator = build_orchestrator(config, &venues);
    let persist = args.store || args.incremental;
    let store: Arc<dyn RecordStore> = if persist {
        open_store(config)?
    } else {
        Arc::new(InMemoryRecordStore::new())
    };
    let service = TelemetrySyncService::new(Arc::clone(&orchestrator), store);
    let filter = venue_filter(&venues);

    let report = match plan {
        Plan::Snapshot => {
            info!("Fetching {} snapshot for {}", kind, args.symbol);
            service
                .fetch_snapshot(kind, &args.symbol, filter, persist)
                .await?
        }
        Plan::History(start) => {
            info!("Fetching {} history for {} from {} to {}", kind, args.symbol, start, end);
            service
                .fetch_history(kind, &args.symbol, filter, start, end, persist)
                .await?
        }
        Plan::Incremental(default_start) => {
            info!("Incremental {} sync for {} up to {}", kind, args.symbol, end);
            service
                .sync_incremental(kind, &args.symbol, filter, default_start, end)
                .await?
        }
    };

    output::print_fetch_report(kind, &report);
    summarize(&report, persist);
    orchestrator.close_all().await;
    Ok(())
}

fn summarize(report: &SyncReport, persist: bool) {
    for venue in &report.skipped {
        info!("{} is already up to date", venue);
    }
    if report.failed() > 0 {
        warn!("{} of {} venue(s) failed", report.failed(), report.results.len());
    }
    if persist {
        info!("Stored {} record(s)", report.written);
    }
}
