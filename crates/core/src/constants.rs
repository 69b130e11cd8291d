use std::time::Duration;

/// Symbols collected when none are configured.
pub const DEFAULT_SYMBOLS: [&str; 2] = ["BTCUSDT-PERP", "ETHUSDT-PERP"];

/// Open-interest collection interval
pub const DEFAULT_OI_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Funding-rate collection interval
pub const DEFAULT_FUNDING_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Buffered liquidations that trigger a flush
pub const DEFAULT_LIQUIDATION_BUFFER: usize = 100;

/// Liquidations kept across failed flushes before the oldest are dropped
pub const MAX_RETAINED_LIQUIDATIONS: usize = 100_000;

/// Time budget for stopping jobs and streams
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// How often a controlled daemon publishes its status file
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// How often the stop marker is polled
pub const STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Directory under the catalog root holding daemon control files
pub const DAEMON_DIR: &str = ".daemon";

/// Default look-back for an incremental sync without a watermark
pub const DEFAULT_BACKFILL: Duration = Duration::from_secs(24 * 60 * 60);
