//! Perpflow Core - telemetry services, storage traits and the daemon.
//!
//! This crate ties the venue orchestrator from `perpflow-market-data` to
//! persistent storage. It is storage-agnostic and defines the
//! [`telemetry::RecordStore`] trait implemented by `perpflow-storage-csv`.

pub mod constants;
pub mod daemon;
pub mod errors;
pub mod telemetry;

pub use daemon::{Daemon, DaemonConfig, DaemonControl, DaemonStatus};
pub use telemetry::{
    InMemoryRecordStore, RecordQuery, RecordStore, SyncReport, TelemetrySyncService,
};

// Re-export error types
pub use errors::Error;
pub use errors::Result;
