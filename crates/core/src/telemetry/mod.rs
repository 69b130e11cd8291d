//! Telemetry persistence and synchronization.
//!
//! - **Store** (`store.rs`) - `RecordStore` trait and `RecordQuery`
//! - **Memory store** (`memory_store.rs`) - volatile store for tests and dry runs
//! - **Sync** (`sync.rs`) - fetch-and-store service with incremental resume

mod memory_store;
mod store;
mod sync;

pub use memory_store::InMemoryRecordStore;
pub use store::{RecordQuery, RecordStore};
pub use sync::{history_operation, snapshot_operation, SyncReport, TelemetrySyncService};
