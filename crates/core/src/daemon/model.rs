//! Daemon status model.

use chrono::{DateTime, Utc};
use perpflow_market_data::{CircuitSnapshot, Symbol, Venue};
use serde::{Deserialize, Serialize};

/// Point-in-time view of the daemon, published for external monitoring.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_seconds: u64,
    pub fetch_count: u64,
    pub error_count: u64,
    pub liquidation_count: u64,
    pub buffered_liquidations: usize,
    pub last_error: Option<String>,
    pub last_fetch_time: Option<DateTime<Utc>>,
    pub symbols: Vec<Symbol>,
    pub venues: Vec<Venue>,
    pub circuits: Vec<CircuitSnapshot>,
    pub updated_at: DateTime<Utc>,
}
