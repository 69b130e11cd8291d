//! Telemetry models
//!
//! - `types` - Identifiers and enums (Venue, Symbol, Side, RecordKind, OperationKind)
//! - `records` - Validated record values (OpenInterest, FundingRate, Liquidation, Record)

mod records;
mod types;

pub use records::{
    ensure_not_future, notional, FundingRate, Liquidation, OpenInterest, Record,
    CLOCK_SKEW_TOLERANCE_SECS,
};
pub use types::{OperationKind, RecordKind, Side, Symbol, Venue, PERPETUAL_SUFFIX};
