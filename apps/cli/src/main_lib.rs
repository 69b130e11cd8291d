use std::sync::Arc;

use perpflow_market_data::{
    BinanceFetcher, BinanceSettings, BybitFetcher, BybitSettings, Fetcher, HyperliquidFetcher,
    Orchestrator, Venue,
};
use perpflow_storage_csv::CsvRecordStore;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{Config, LogFormat};

pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init(),
    }
}

/// Fetchers for `venues`, or for every venue when none are given.
pub fn build_fetchers(config: &Config, venues: &[Venue]) -> Vec<Arc<dyn Fetcher>> {
    let venues: &[Venue] = if venues.is_empty() { &Venue::ALL } else { venues };
    venues
        .iter()
        .map(|venue| -> Arc<dyn Fetcher> {
            match venue {
                Venue::Binance => Arc::new(BinanceFetcher::with_settings(BinanceSettings {
                    api_key: config.binance_api_key.clone(),
                    ..BinanceSettings::default()
                })),
                Venue::Bybit => Arc::new(BybitFetcher::with_settings(BybitSettings {
                    api_key: config.bybit_api_key.clone(),
                    ..BybitSettings::default()
                })),
                Venue::Hyperliquid => Arc::new(HyperliquidFetcher::new()),
            }
        })
        .collect()
}

pub fn build_orchestrator(config: &Config, venues: &[Venue]) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(build_fetchers(config, venues)))
}

pub fn open_store(config: &Config) -> anyhow::Result<Arc<CsvRecordStore>> {
    Ok(Arc::new(CsvRecordStore::open(&config.catalog_path)?))
}

/// `None` when no venue was named on the command line.
pub fn venue_filter(venues: &[Venue]) -> Option<&[Venue]> {
    if venues.is_empty() {
        None
    } else {
        Some(venues)
    }
}
