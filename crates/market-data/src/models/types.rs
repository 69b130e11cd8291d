use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// Exchange venues a fetcher can be built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Venue {
    Binance,
    Bybit,
    Hyperliquid,
}

impl Venue {
    /// Every known venue, in display order.
    pub const ALL: [Venue; 3] = [Venue::Binance, Venue::Bybit, Venue::Hyperliquid];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binance => "BINANCE",
            Self::Bybit => "BYBIT",
            Self::Hyperliquid => "HYPERLIQUID",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Venue {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BINANCE" => Ok(Self::Binance),
            "BYBIT" => Ok(Self::Bybit),
            "HYPERLIQUID" => Ok(Self::Hyperliquid),
            _ => Err(ValidationError::UnknownVenue(s.to_string())),
        }
    }
}

/// Canonical instrument symbol, e.g. `BTCUSDT-PERP`.
///
/// Symbols are trimmed and upper-cased on construction. Only ASCII
/// letters, digits, `-` and `_` are accepted, which keeps a symbol safe
/// to use as a path component in the partitioned store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

/// Suffix marking a perpetual contract in canonical symbols.
pub const PERPETUAL_SUFFIX: &str = "-PERP";

/// Quote assets recognised when splitting a pair into its base asset.
const QUOTE_ASSETS: &[&str] = &["USDT", "USDC", "USD"];

impl Symbol {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ValidationError> {
        let normalized = raw.as_ref().trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }
        if !normalized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidSymbol(raw.as_ref().to_string()));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The trading pair without the contract suffix (`BTCUSDT-PERP` -> `BTCUSDT`).
    pub fn pair(&self) -> &str {
        self.0.strip_suffix(PERPETUAL_SUFFIX).unwrap_or(&self.0)
    }

    /// The base asset of the pair (`BTCUSDT-PERP` -> `BTC`).
    pub fn base_asset(&self) -> &str {
        let pair = self.pair();
        QUOTE_ASSETS
            .iter()
            .find_map(|quote| pair.strip_suffix(quote).filter(|base| !base.is_empty()))
            .unwrap_or(pair)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

/// Side of a liquidated position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LONG" => Ok(Self::Long),
            "SHORT" => Ok(Self::Short),
            _ => Err(ValidationError::UnknownSide(s.to_string())),
        }
    }
}

/// Kind of telemetry record; also the top-level directory of the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    OpenInterest,
    FundingRate,
    Liquidation,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [
        RecordKind::OpenInterest,
        RecordKind::FundingRate,
        RecordKind::Liquidation,
    ];

    /// Directory name used under the catalog root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::OpenInterest => "open_interest",
            Self::FundingRate => "funding_rate",
            Self::Liquidation => "liquidations",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for RecordKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oi" | "open_interest" | "open-interest" => Ok(Self::OpenInterest),
            "funding" | "funding_rate" | "funding-rate" => Ok(Self::FundingRate),
            "liquidations" | "liquidation" | "liq" => Ok(Self::Liquidation),
            _ => Err(ValidationError::UnknownRecordKind(s.to_string())),
        }
    }
}

/// Logical venue operation. Circuit breakers are keyed by venue and operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    OpenInterest,
    FundingRate,
    OpenInterestHistory,
    FundingRateHistory,
    LiquidationStream,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenInterest => "open_interest",
            Self::FundingRate => "funding_rate",
            Self::OpenInterestHistory => "open_interest_history",
            Self::FundingRateHistory => "funding_rate_history",
            Self::LiquidationStream => "liquidation_stream",
        }
    }

    /// Record kind produced by this operation.
    pub fn record_kind(&self) -> RecordKind {
        match self {
            Self::OpenInterest | Self::OpenInterestHistory => RecordKind::OpenInterest,
            Self::FundingRate | Self::FundingRateHistory => RecordKind::FundingRate,
            Self::LiquidationStream => RecordKind::Liquidation,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_is_normalized() {
        let symbol = Symbol::new("  btcusdt-perp ").unwrap();
        assert_eq!(symbol.as_str(), "BTCUSDT-PERP");
        assert_eq!(symbol.pair(), "BTCUSDT");
        assert_eq!(symbol.base_asset(), "BTC");
    }

    #[test]
    fn symbol_rejects_empty_and_path_characters() {
        assert_eq!(Symbol::new("   "), Err(ValidationError::EmptySymbol));
        assert!(matches!(
            Symbol::new("../etc"),
            Err(ValidationError::InvalidSymbol(_))
        ));
        assert!(Symbol::new("BTC/USDT").is_err());
    }

    #[test]
    fn base_asset_handles_plain_and_usd_quoted_pairs() {
        assert_eq!(Symbol::new("ETHUSDC-PERP").unwrap().base_asset(), "ETH");
        assert_eq!(Symbol::new("SOLUSD").unwrap().base_asset(), "SOL");
        assert_eq!(Symbol::new("HYPE").unwrap().base_asset(), "HYPE");
        assert_eq!(Symbol::new("USDT").unwrap().base_asset(), "USDT");
    }

    #[test]
    fn venue_parses_case_insensitively() {
        assert_eq!("binance".parse::<Venue>().unwrap(), Venue::Binance);
        assert_eq!(" ByBit ".parse::<Venue>().unwrap(), Venue::Bybit);
        assert!("okx".parse::<Venue>().is_err());
        assert_eq!(Venue::Hyperliquid.to_string(), "HYPERLIQUID");
    }

    #[test]
    fn record_kind_aliases() {
        assert_eq!("oi".parse::<RecordKind>().unwrap(), RecordKind::OpenInterest);
        assert_eq!("funding".parse::<RecordKind>().unwrap(), RecordKind::FundingRate);
        assert_eq!(
            "liquidations".parse::<RecordKind>().unwrap(),
            RecordKind::Liquidation
        );
        assert_eq!(RecordKind::Liquidation.dir_name(), "liquidations");
    }

    #[test]
    fn operations_map_to_record_kinds() {
        assert_eq!(
            OperationKind::FundingRateHistory.record_kind(),
            RecordKind::FundingRate
        );
        assert_eq!(
            OperationKind::LiquidationStream.record_kind(),
            RecordKind::Liquidation
        );
    }
}
