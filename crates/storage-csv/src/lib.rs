//! CSV storage implementation for perpflow.
//!
//! This crate persists telemetry records as date-partitioned CSV files and
//! implements the [`RecordStore`](perpflow_core::RecordStore) trait defined
//! in `perpflow-core`.
//!
//! # Architecture
//!
//! ```text
//! core (services, daemon)
//!          │
//!          ▼
//!   storage-csv (this crate)
//!          │
//!          ▼
//! <catalog>/<kind>/<SYMBOL>.<VENUE>/<YYYY-MM-DD>.csv
//! ```
//!
//! Every write rewrites the touched partitions whole through a temporary
//! sibling file. Concurrent writers to one catalog are not supported.

pub mod errors;
pub mod telemetry;

pub use errors::StorageError;
pub use telemetry::{CsvRecordStore, PartitionKey};

// Re-export from perpflow-core for convenience
pub use perpflow_core::errors::{Error, Result};
