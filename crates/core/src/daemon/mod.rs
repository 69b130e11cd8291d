//! Scheduled collection daemon.
//!
//! - `config`: intervals, symbols and venues
//! - `service`: the [`Daemon`] and its task lifecycle
//! - `buffer`: liquidation buffer flushed at a threshold
//! - `stats`: counters reported in [`DaemonStatus`]
//! - `control`: status file and stop marker for out-of-process control

mod buffer;
mod config;
mod control;
mod model;
mod service;
mod stats;

pub use buffer::LiquidationBuffer;
pub use config::DaemonConfig;
pub use control::DaemonControl;
pub use model::DaemonStatus;
pub use service::Daemon;
pub use stats::DaemonStats;
