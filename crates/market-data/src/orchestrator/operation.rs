use std::fmt;

use chrono::{DateTime, Utc};

use crate::models::OperationKind;

/// A logical request fanned out to every targeted venue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchOperation {
    OpenInterest,
    FundingRate,
    OpenInterestHistory {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    FundingRateHistory {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl FetchOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            FetchOperation::OpenInterest => OperationKind::OpenInterest,
            FetchOperation::FundingRate => OperationKind::FundingRate,
            FetchOperation::OpenInterestHistory { .. } => OperationKind::OpenInterestHistory,
            FetchOperation::FundingRateHistory { .. } => OperationKind::FundingRateHistory,
        }
    }

    /// Snapshot operations are single request/response calls.
    pub fn is_snapshot(&self) -> bool {
        matches!(self, FetchOperation::OpenInterest | FetchOperation::FundingRate)
    }
}

impl fmt::Display for FetchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOperation::OpenInterestHistory { start, end }
            | FetchOperation::FundingRateHistory { start, end } => {
                write!(f, "{} [{} .. {}]", self.kind(), start, end)
            }
            _ => write!(f, "{}", self.kind()),
        }
    }
}
