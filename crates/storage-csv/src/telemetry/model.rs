//! CSV row models for telemetry records.
//!
//! Rows carry every field as text: RFC 3339 timestamps with a `Z` suffix
//! and exact decimal strings. Optional fields are empty cells.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use perpflow_market_data::{
    FundingRate, Liquidation, OpenInterest, Record, Side, Symbol, Venue,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Conversion between a record kind and its CSV row.
pub(crate) trait PartitionRow: Serialize + DeserializeOwned {
    /// Row for `record`, or `None` when the record is of another kind.
    fn from_record(record: &Record) -> Option<Self>;

    fn into_record(self) -> Result<Record, String>;
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("bad {} '{}': {}", field, raw, e))
}

fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, String> {
    Decimal::from_str(raw).map_err(|e| format!("bad {} '{}': {}", field, raw, e))
}

fn parse_key(symbol: &str, venue: &str) -> Result<(Symbol, Venue), String> {
    let symbol = Symbol::new(symbol).map_err(|e| e.to_string())?;
    let venue = venue.parse::<Venue>().map_err(|e| e.to_string())?;
    Ok((symbol, venue))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenInterestRow {
    pub timestamp: String,
    pub symbol: String,
    pub venue: String,
    pub amount: String,
    pub value: String,
}

impl From<&OpenInterest> for OpenInterestRow {
    fn from(oi: &OpenInterest) -> Self {
        Self {
            timestamp: format_timestamp(oi.timestamp()),
            symbol: oi.symbol().to_string(),
            venue: oi.venue().to_string(),
            amount: oi.amount().to_string(),
            value: oi.value().to_string(),
        }
    }
}

impl PartitionRow for OpenInterestRow {
    fn from_record(record: &Record) -> Option<Self> {
        record.as_open_interest().map(Self::from)
    }

    fn into_record(self) -> Result<Record, String> {
        let (symbol, venue) = parse_key(&self.symbol, &self.venue)?;
        let oi = OpenInterest::new(
            parse_timestamp("timestamp", &self.timestamp)?,
            symbol,
            venue,
            parse_decimal("amount", &self.amount)?,
            parse_decimal("value", &self.value)?,
        )
        .map_err(|e| e.to_string())?;
        Ok(oi.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRateRow {
    pub timestamp: String,
    pub symbol: String,
    pub venue: String,
    pub rate: String,
    pub next_funding_time: Option<String>,
    pub predicted_rate: Option<String>,
}

impl From<&FundingRate> for FundingRateRow {
    fn from(funding: &FundingRate) -> Self {
        Self {
            timestamp: format_timestamp(funding.timestamp()),
            symbol: funding.symbol().to_string(),
            venue: funding.venue().to_string(),
            rate: funding.rate().to_string(),
            next_funding_time: funding.next_funding_time().map(format_timestamp),
            predicted_rate: funding.predicted_rate().map(|r| r.to_string()),
        }
    }
}

impl PartitionRow for FundingRateRow {
    fn from_record(record: &Record) -> Option<Self> {
        record.as_funding_rate().map(Self::from)
    }

    fn into_record(self) -> Result<Record, String> {
        let (symbol, venue) = parse_key(&self.symbol, &self.venue)?;
        let next = self
            .next_funding_time
            .as_deref()
            .filter(|raw| !raw.is_empty())
            .map(|raw| parse_timestamp("next_funding_time", raw))
            .transpose()?;
        let predicted = self
            .predicted_rate
            .as_deref()
            .filter(|raw| !raw.is_empty())
            .map(|raw| parse_decimal("predicted_rate", raw))
            .transpose()?;
        let funding = FundingRate::new(
            parse_timestamp("timestamp", &self.timestamp)?,
            symbol,
            venue,
            parse_decimal("rate", &self.rate)?,
        )
        .map_err(|e| e.to_string())?
        .with_next_funding_time(next)
        .with_predicted_rate(predicted);
        Ok(funding.into())
    }
}

/// `value` is written for readers of the raw files and recomputed on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationRow {
    pub timestamp: String,
    pub symbol: String,
    pub venue: String,
    pub side: String,
    pub quantity: String,
    pub price: String,
    pub value: String,
}

impl From<&Liquidation> for LiquidationRow {
    fn from(liq: &Liquidation) -> Self {
        Self {
            timestamp: format_timestamp(liq.timestamp()),
            symbol: liq.symbol().to_string(),
            venue: liq.venue().to_string(),
            side: liq.side().to_string(),
            quantity: liq.quantity().to_string(),
            price: liq.price().to_string(),
            value: liq.value().to_string(),
        }
    }
}

impl PartitionRow for LiquidationRow {
    fn from_record(record: &Record) -> Option<Self> {
        record.as_liquidation().map(Self::from)
    }

    fn into_record(self) -> Result<Record, String> {
        let (symbol, venue) = parse_key(&self.symbol, &self.venue)?;
        let liq = Liquidation::new(
            parse_timestamp("timestamp", &self.timestamp)?,
            symbol,
            venue,
            self.side.parse::<Side>().map_err(|e| e.to_string())?,
            parse_decimal("quantity", &self.quantity)?,
            parse_decimal("price", &self.price)?,
        )
        .map_err(|e| e.to_string())?;
        Ok(liq.into())
    }
}
