//! `stream-liquidations`

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use perpflow_core::daemon::LiquidationBuffer;
use perpflow_core::RecordStore;
use perpflow_market_data::{HandlerError, Liquidation, LiquidationHandler, Symbol};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::VenueArgs;
use crate::config::Config;
use crate::main_lib::{build_orchestrator, open_store, venue_filter};
use crate::output;

/// Liquidations buffered before each write to the catalog.
const STREAM_BUFFER: usize = 100;

#[derive(Args, Debug)]
pub struct StreamArgs {
    /// Canonical symbol, e.g. BTCUSDT-PERP
    pub symbol: Symbol,

    #[command(flatten)]
    pub venue: VenueArgs,

    /// Persist liquidations to the catalog
    #[arg(long)]
    pub store: bool,

    /// Do not print individual events
    #[arg(long, short)]
    pub quiet: bool,
}

pub async fn execute(args: StreamArgs, config: &Config) -> Result<()> {
    let venues = args.venue.venues();
    let orchestrator = build_orchestrator(config, &venues);
    let store: Option<Arc<dyn RecordStore>> = if args.store {
        Some(open_store(config)?)
    } else {
        None
    };
    let buffer = Arc::new(LiquidationBuffer::new(STREAM_BUFFER));
    let cancel = CancellationToken::new();

    let flusher = store.clone().map(|store| {
        let buffer = Arc::clone(&buffer);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = buffer.wait_full() => {
                        if let Err(e) = buffer.flush(store.as_ref()).await {
                            error!("Writing liquidations failed: {}", e);
                        }
                    }
                }
            }
        })
    });

    let handler: LiquidationHandler = {
        let buffer = Arc::clone(&buffer);
        let quiet = args.quiet;
        let keep = store.is_some();
        Arc::new(move |liquidation: Liquidation| -> Result<(), HandlerError> {
            if !quiet {
                output::print_liquidation(&liquidation);
            }
            if keep {
                buffer.push(liquidation);
            }
            Ok(())
        })
    };

    info!("Streaming {} liquidations, press Ctrl-C to stop", args.symbol);
    let stream = orchestrator.stream_liquidations(
        &args.symbol,
        handler,
        venue_filter(&venues),
        &cancel,
    );
    tokio::pin!(stream);
    let outcomes = tokio::select! {
        outcomes = &mut stream => outcomes,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping streams");
            cancel.cancel();
            stream.await
        }
    };
    cancel.cancel();

    for outcome in &outcomes {
        if let Err(e) = &outcome.result {
            warn!("{} stream ended: {}", outcome.venue, e);
        }
    }

    if let Some(flusher) = flusher {
        if let Err(e) = flusher.await {
            error!("Liquidation writer task failed: {}", e);
        }
    }
    if let Some(store) = &store {
        match buffer.flush(store.as_ref()).await {
            Ok(written) if written > 0 => info!("Wrote {} buffered liquidation(s)", written),
            Ok(_) => {}
            Err(e) => error!("Final liquidation write failed, {} lost: {}", buffer.len(), e),
        }
    }
    orchestrator.close_all().await;
    Ok(())
}
