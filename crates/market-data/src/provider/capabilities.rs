//! Fetcher capabilities.
//!
//! Describes which operations a venue adapter implements so the
//! orchestrator can reject unsupported requests before touching the
//! venue or its circuit breakers.

use crate::models::OperationKind;

/// Describes the capabilities of a venue fetcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetcherCapabilities {
    /// Current open interest and funding snapshots.
    pub supports_snapshot: bool,

    /// Paginated open-interest history.
    pub supports_open_interest_history: bool,

    /// Paginated funding-rate history.
    pub supports_funding_history: bool,

    /// Live liquidation stream.
    pub supports_liquidation_stream: bool,
}

impl FetcherCapabilities {
    pub fn supports(&self, operation: OperationKind) -> bool {
        match operation {
            OperationKind::OpenInterest | OperationKind::FundingRate => self.supports_snapshot,
            OperationKind::OpenInterestHistory => self.supports_open_interest_history,
            OperationKind::FundingRateHistory => self.supports_funding_history,
            OperationKind::LiquidationStream => self.supports_liquidation_stream,
        }
    }
}

impl Default for FetcherCapabilities {
    fn default() -> Self {
        Self {
            supports_snapshot: true,
            supports_open_interest_history: true,
            supports_funding_history: true,
            supports_liquidation_stream: true,
        }
    }
}
