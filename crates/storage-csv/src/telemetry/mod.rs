//! CSV storage for telemetry records.

mod model;
mod partition;
mod repository;

pub use model::{FundingRateRow, LiquidationRow, OpenInterestRow};
pub use partition::PartitionKey;
pub use repository::CsvRecordStore;
