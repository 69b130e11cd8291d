use std::time::Duration;

use perpflow_market_data::{Symbol, Venue};

use crate::constants::{
    DEFAULT_FUNDING_INTERVAL, DEFAULT_LIQUIDATION_BUFFER, DEFAULT_OI_INTERVAL,
    DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_STATUS_INTERVAL, DEFAULT_SYMBOLS,
};
use crate::errors::{Error, Result};

/// Daemon configuration.
#[derive(Clone, Debug)]
pub struct DaemonConfig {
    /// Symbols collected on every job tick and streamed for liquidations.
    pub symbols: Vec<Symbol>,
    /// Venues queried; venues without a fetcher are reported as errors.
    pub venues: Vec<Venue>,
    pub oi_interval: Duration,
    pub funding_interval: Duration,
    /// Buffered liquidations that trigger a flush to storage.
    pub liquidation_buffer: usize,
    /// Budget shared by the job and stream phases of `stop()`.
    pub shutdown_timeout: Duration,
    /// How often the status file is refreshed when a control directory is set.
    pub status_interval: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            symbols: DEFAULT_SYMBOLS
                .iter()
                .filter_map(|s| Symbol::new(s).ok())
                .collect(),
            venues: Venue::ALL.to_vec(),
            oi_interval: DEFAULT_OI_INTERVAL,
            funding_interval: DEFAULT_FUNDING_INTERVAL,
            liquidation_buffer: DEFAULT_LIQUIDATION_BUFFER,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            status_interval: DEFAULT_STATUS_INTERVAL,
        }
    }
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(Error::Config("at least one symbol is required".to_string()));
        }
        if self.venues.is_empty() {
            return Err(Error::Config("at least one venue is required".to_string()));
        }
        if self.oi_interval.is_zero() || self.funding_interval.is_zero() {
            return Err(Error::Config("job intervals must be positive".to_string()));
        }
        if self.status_interval.is_zero() {
            return Err(Error::Config("status interval must be positive".to_string()));
        }
        if self.liquidation_buffer == 0 {
            return Err(Error::Config(
                "liquidation buffer must hold at least one event".to_string(),
            ));
        }
        Ok(())
    }
}
