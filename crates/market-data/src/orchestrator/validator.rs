//! Record validation applied to every successful venue payload.
//!
//! Hard failures drop the record:
//! - a venue or symbol other than the one requested
//! - a timestamp beyond the clock-skew tolerance
//!
//! Soft warnings are logged and the record is kept:
//! - funding rates above the configured magnitude

use log::warn;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::errors::ValidationError;
use crate::models::{ensure_not_future, Record, Symbol, Venue};

/// Validation severity levels.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationSeverity {
    /// Record is dropped.
    Hard,
    /// Record is kept, a warning is logged.
    Soft,
}

/// A single finding about a record.
#[derive(Clone, Debug)]
pub struct ValidationIssue {
    pub severity: ValidationSeverity,
    pub message: String,
}

/// Record validator configuration.
#[derive(Clone, Debug)]
pub struct ValidatorConfig {
    /// Funding rates with a larger magnitude are logged as suspicious.
    pub max_abs_funding_rate: Decimal,
    /// Whether to reject timestamps in the future.
    pub reject_future_timestamps: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_abs_funding_rate: dec!(0.01),
            reject_future_timestamps: true,
        }
    }
}

/// Checks records returned by a venue before they leave the orchestrator.
#[derive(Clone, Debug, Default)]
pub struct RecordValidator {
    config: ValidatorConfig,
}

impl RecordValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate one record requested from `venue` for `symbol`.
    ///
    /// Soft issues are logged. The first hard issue is returned as an error.
    pub fn validate(
        &self,
        venue: Venue,
        symbol: &Symbol,
        record: &Record,
    ) -> Result<(), ValidationError> {
        let issues = self.inspect(venue, symbol, record);
        for issue in issues.iter().filter(|i| i.severity == ValidationSeverity::Soft) {
            warn!("{} {} {}: {}", venue, symbol, record.kind(), issue.message);
        }

        if record.venue() != venue || record.symbol() != symbol {
            return Err(ValidationError::Mismatch(format!(
                "expected {} {}, got {} {}",
                venue,
                symbol,
                record.venue(),
                record.symbol()
            )));
        }
        if self.config.reject_future_timestamps {
            ensure_not_future(record.timestamp())?;
        }
        Ok(())
    }

    fn inspect(&self, venue: Venue, symbol: &Symbol, record: &Record) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if record.venue() != venue || record.symbol() != symbol {
            issues.push(ValidationIssue {
                severity: ValidationSeverity::Hard,
                message: "venue or symbol mismatch".to_string(),
            });
        }
        if let Some(funding) = record.as_funding_rate() {
            if funding.rate().abs() > self.config.max_abs_funding_rate {
                issues.push(ValidationIssue {
                    severity: ValidationSeverity::Soft,
                    message: format!(
                        "unusually large funding rate {} (limit {})",
                        funding.rate(),
                        self.config.max_abs_funding_rate
                    ),
                });
            }
        }
        issues
    }

    /// Keep the records that pass validation. Returns the survivors and the
    /// number dropped.
    pub fn retain_valid(
        &self,
        venue: Venue,
        symbol: &Symbol,
        records: Vec<Record>,
    ) -> (Vec<Record>, usize) {
        let total = records.len();
        let kept: Vec<Record> = records
            .into_iter()
            .filter(|record| match self.validate(venue, symbol, record) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Dropping {} record from {}: {}", record.kind(), venue, e);
                    false
                }
            })
            .collect();
        let dropped = total - kept.len();
        (kept, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FundingRate, OpenInterest};
    use chrono::{TimeDelta, Utc};

    fn btc() -> Symbol {
        Symbol::new("BTCUSDT-PERP").unwrap()
    }

    fn oi(venue: Venue, symbol: Symbol) -> Record {
        let ts = Utc::now() - TimeDelta::minutes(1);
        OpenInterest::new(ts, symbol, venue, dec!(10), dec!(100))
            .unwrap()
            .into()
    }

    #[test]
    fn accepts_matching_records() {
        let validator = RecordValidator::new();
        assert!(validator
            .validate(Venue::Binance, &btc(), &oi(Venue::Binance, btc()))
            .is_ok());
    }

    #[test]
    fn rejects_foreign_venue_and_symbol() {
        let validator = RecordValidator::new();
        let eth = Symbol::new("ETHUSDT-PERP").unwrap();
        assert!(matches!(
            validator.validate(Venue::Binance, &btc(), &oi(Venue::Bybit, btc())),
            Err(ValidationError::Mismatch(_))
        ));
        assert!(matches!(
            validator.validate(Venue::Binance, &btc(), &oi(Venue::Binance, eth)),
            Err(ValidationError::Mismatch(_))
        ));
    }

    #[test]
    fn large_funding_is_kept_with_warning() {
        let validator = RecordValidator::new();
        let ts = Utc::now() - TimeDelta::hours(1);
        let record: Record = FundingRate::new(ts, btc(), Venue::Bybit, dec!(0.05))
            .unwrap()
            .into();
        let (kept, dropped) = validator.retain_valid(Venue::Bybit, &btc(), vec![record]);
        assert_eq!(kept.len(), 1);
        assert_eq!(dropped, 0);
    }

    #[test]
    fn retain_valid_counts_drops() {
        let validator = RecordValidator::new();
        let records = vec![
            oi(Venue::Binance, btc()),
            oi(Venue::Hyperliquid, btc()),
            oi(Venue::Binance, btc()),
        ];
        let (kept, dropped) = validator.retain_valid(Venue::Binance, &btc(), records);
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped, 1);
    }
}
