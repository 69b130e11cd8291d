use std::time::Duration;

use crate::errors::FetchError;
use crate::models::{FundingRate, OpenInterest, OperationKind, Record, Symbol, Venue};

/// Outcome of one venue's share of a fan-out fetch.
///
/// `error` is set exactly when the venue call failed; `records` then is
/// empty. A successful call may still carry zero records (an empty
/// history range) or have had records dropped by validation.
#[derive(Clone, Debug)]
pub struct FetchResult {
    pub venue: Venue,
    pub symbol: Symbol,
    pub operation: OperationKind,
    pub records: Vec<Record>,
    pub error: Option<FetchError>,
    /// Records dropped by validation.
    pub rejected: usize,
    pub elapsed: Duration,
}

impl FetchResult {
    pub fn succeeded(
        venue: Venue,
        symbol: Symbol,
        operation: OperationKind,
        records: Vec<Record>,
        rejected: usize,
        elapsed: Duration,
    ) -> Self {
        Self {
            venue,
            symbol,
            operation,
            records,
            error: None,
            rejected,
            elapsed,
        }
    }

    pub fn failed(
        venue: Venue,
        symbol: Symbol,
        operation: OperationKind,
        error: FetchError,
        elapsed: Duration,
    ) -> Self {
        Self {
            venue,
            symbol,
            operation,
            records: Vec::new(),
            error: Some(error),
            rejected: 0,
            elapsed,
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    pub fn open_interest(&self) -> impl Iterator<Item = &OpenInterest> {
        self.records.iter().filter_map(Record::as_open_interest)
    }

    pub fn funding_rates(&self) -> impl Iterator<Item = &FundingRate> {
        self.records.iter().filter_map(Record::as_funding_rate)
    }
}
