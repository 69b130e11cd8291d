//! Normalized telemetry records.
//!
//! Records are immutable once built. Every constructor validates its
//! inputs, so a value of these types always satisfies the field
//! invariants (non-negative open interest, positive liquidation size,
//! no timestamps from the future).

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::types::{RecordKind, Side, Symbol, Venue};
use crate::errors::ValidationError;

/// Tolerated clock difference between a venue and this host.
pub const CLOCK_SKEW_TOLERANCE_SECS: i64 = 5;

/// Rejects timestamps later than now plus the clock-skew tolerance.
pub fn ensure_not_future(timestamp: DateTime<Utc>) -> Result<(), ValidationError> {
    if timestamp > Utc::now() + TimeDelta::seconds(CLOCK_SKEW_TOLERANCE_SECS) {
        return Err(ValidationError::FutureTimestamp { timestamp });
    }
    Ok(())
}

fn ensure_non_negative(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::Negative { field, value });
    }
    Ok(())
}

/// `amount * price`, rejecting products outside the decimal range.
pub fn notional(
    field: &'static str,
    amount: Decimal,
    price: Decimal,
) -> Result<Decimal, ValidationError> {
    amount
        .checked_mul(price)
        .ok_or(ValidationError::Overflow { field })
}

fn ensure_positive(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value <= Decimal::ZERO {
        return Err(ValidationError::NonPositive { field, value });
    }
    Ok(())
}

/// Open interest observed at a point in time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OpenInterest {
    timestamp: DateTime<Utc>,
    symbol: Symbol,
    venue: Venue,
    /// Outstanding contracts, in base units.
    amount: Decimal,
    /// Notional value of the open interest, in quote units.
    value: Decimal,
}

impl OpenInterest {
    pub fn new(
        timestamp: DateTime<Utc>,
        symbol: Symbol,
        venue: Venue,
        amount: Decimal,
        value: Decimal,
    ) -> Result<Self, ValidationError> {
        ensure_not_future(timestamp)?;
        ensure_non_negative("open_interest", amount)?;
        ensure_non_negative("open_interest_value", value)?;
        Ok(Self {
            timestamp,
            symbol,
            venue,
            amount,
            value,
        })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn venue(&self) -> Venue {
        self.venue
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn value(&self) -> Decimal {
        self.value
    }
}

/// Funding rate for a perpetual contract.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FundingRate {
    timestamp: DateTime<Utc>,
    symbol: Symbol,
    venue: Venue,
    /// Signed rate per funding interval (0.0001 == 0.01%).
    rate: Decimal,
    next_funding_time: Option<DateTime<Utc>>,
    predicted_rate: Option<Decimal>,
}

impl FundingRate {
    pub fn new(
        timestamp: DateTime<Utc>,
        symbol: Symbol,
        venue: Venue,
        rate: Decimal,
    ) -> Result<Self, ValidationError> {
        ensure_not_future(timestamp)?;
        Ok(Self {
            timestamp,
            symbol,
            venue,
            rate,
            next_funding_time: None,
            predicted_rate: None,
        })
    }

    pub fn with_next_funding_time(mut self, next: Option<DateTime<Utc>>) -> Self {
        self.next_funding_time = next;
        self
    }

    pub fn with_predicted_rate(mut self, predicted: Option<Decimal>) -> Self {
        self.predicted_rate = predicted;
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn venue(&self) -> Venue {
        self.venue
    }

    pub fn rate(&self) -> Decimal {
        self.rate
    }

    pub fn next_funding_time(&self) -> Option<DateTime<Utc>> {
        self.next_funding_time
    }

    pub fn predicted_rate(&self) -> Option<Decimal> {
        self.predicted_rate
    }

    /// Rate annualized as a percentage, assuming three fundings per day.
    pub fn annualized_percent(&self) -> Decimal {
        self.rate.saturating_mul(Decimal::from(3 * 365 * 100))
    }
}

/// A forced position closure reported by a venue.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Liquidation {
    timestamp: DateTime<Utc>,
    symbol: Symbol,
    venue: Venue,
    side: Side,
    quantity: Decimal,
    price: Decimal,
    value: Decimal,
}

impl Liquidation {
    pub fn new(
        timestamp: DateTime<Utc>,
        symbol: Symbol,
        venue: Venue,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Self, ValidationError> {
        ensure_not_future(timestamp)?;
        ensure_positive("quantity", quantity)?;
        ensure_positive("price", price)?;
        let value = notional("value", quantity, price)?;
        Ok(Self {
            timestamp,
            symbol,
            venue,
            side,
            quantity,
            price,
            value,
        })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn venue(&self) -> Venue {
        self.venue
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn value(&self) -> Decimal {
        self.value
    }
}

/// Any telemetry record.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    OpenInterest(OpenInterest),
    FundingRate(FundingRate),
    Liquidation(Liquidation),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::OpenInterest(_) => RecordKind::OpenInterest,
            Self::FundingRate(_) => RecordKind::FundingRate,
            Self::Liquidation(_) => RecordKind::Liquidation,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::OpenInterest(r) => r.timestamp(),
            Self::FundingRate(r) => r.timestamp(),
            Self::Liquidation(r) => r.timestamp(),
        }
    }

    pub fn symbol(&self) -> &Symbol {
        match self {
            Self::OpenInterest(r) => r.symbol(),
            Self::FundingRate(r) => r.symbol(),
            Self::Liquidation(r) => r.symbol(),
        }
    }

    pub fn venue(&self) -> Venue {
        match self {
            Self::OpenInterest(r) => r.venue(),
            Self::FundingRate(r) => r.venue(),
            Self::Liquidation(r) => r.venue(),
        }
    }

    pub fn as_open_interest(&self) -> Option<&OpenInterest> {
        match self {
            Self::OpenInterest(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_funding_rate(&self) -> Option<&FundingRate> {
        match self {
            Self::FundingRate(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_liquidation(&self) -> Option<&Liquidation> {
        match self {
            Self::Liquidation(r) => Some(r),
            _ => None,
        }
    }
}

impl From<OpenInterest> for Record {
    fn from(value: OpenInterest) -> Self {
        Self::OpenInterest(value)
    }
}

impl From<FundingRate> for Record {
    fn from(value: FundingRate) -> Self {
        Self::FundingRate(value)
    }
}

impl From<Liquidation> for Record {
    fn from(value: Liquidation) -> Self {
        Self::Liquidation(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn btc() -> Symbol {
        Symbol::new("BTCUSDT-PERP").unwrap()
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn liquidation_value_is_quantity_times_price() {
        let liq = Liquidation::new(
            ts(),
            btc(),
            Venue::Binance,
            Side::Long,
            dec!(0.25),
            dec!(64000.5),
        )
        .unwrap();
        assert_eq!(liq.value(), dec!(16000.125));
    }

    #[test]
    fn liquidation_rejects_non_positive_size() {
        let err = Liquidation::new(ts(), btc(), Venue::Bybit, Side::Short, dec!(0), dec!(1))
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::NonPositive {
                field: "quantity",
                value: dec!(0)
            }
        );
        assert!(
            Liquidation::new(ts(), btc(), Venue::Bybit, Side::Short, dec!(1), dec!(-3)).is_err()
        );
    }

    #[test]
    fn liquidation_value_overflow_is_rejected() {
        let huge = Decimal::from_str_exact("100000000000000000000").unwrap();
        let err = Liquidation::new(ts(), btc(), Venue::Binance, Side::Short, huge, huge)
            .unwrap_err();
        assert_eq!(err, ValidationError::Overflow { field: "value" });
        assert_eq!(notional("value", dec!(2), dec!(3.5)), Ok(dec!(7.0)));
    }

    #[test]
    fn annualized_rate_saturates() {
        let rate = FundingRate::new(ts(), btc(), Venue::Bybit, Decimal::MAX).unwrap();
        assert_eq!(rate.annualized_percent(), Decimal::MAX);
    }

    #[test]
    fn open_interest_rejects_negative_values() {
        assert!(OpenInterest::new(ts(), btc(), Venue::Binance, dec!(-1), dec!(0)).is_err());
        assert!(OpenInterest::new(ts(), btc(), Venue::Binance, dec!(0), dec!(0)).is_ok());
    }

    #[test]
    fn future_timestamps_are_rejected_beyond_tolerance() {
        let near = Utc::now() + TimeDelta::seconds(1);
        assert!(FundingRate::new(near, btc(), Venue::Hyperliquid, dec!(0.0001)).is_ok());

        let far = Utc::now() + TimeDelta::minutes(5);
        assert!(matches!(
            FundingRate::new(far, btc(), Venue::Hyperliquid, dec!(0.0001)),
            Err(ValidationError::FutureTimestamp { .. })
        ));
    }

    #[test]
    fn funding_rate_is_signed_and_annualizes() {
        let rate = FundingRate::new(ts(), btc(), Venue::Binance, dec!(-0.0001))
            .unwrap()
            .with_predicted_rate(Some(dec!(0.0002)));
        assert_eq!(rate.annualized_percent(), dec!(-10.95));
        assert_eq!(rate.predicted_rate(), Some(dec!(0.0002)));
        assert_eq!(rate.next_funding_time(), None);
    }

    #[test]
    fn record_accessors_dispatch() {
        let record: Record = OpenInterest::new(ts(), btc(), Venue::Bybit, dec!(10), dec!(20))
            .unwrap()
            .into();
        assert_eq!(record.kind(), RecordKind::OpenInterest);
        assert_eq!(record.venue(), Venue::Bybit);
        assert_eq!(record.timestamp(), ts());
        assert!(record.as_liquidation().is_none());
    }
}
