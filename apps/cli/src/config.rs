//! Environment configuration.
//!
//! Values come from the process environment, with a `.env` file in the
//! working directory loaded first. Command-line flags override them.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use perpflow_core::DaemonConfig;
use perpflow_market_data::Symbol;

/// Catalog root when `PERPFLOW_CATALOG_PATH` is unset.
pub const DEFAULT_CATALOG_PATH: &str = "./data/catalog";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub catalog_path: PathBuf,
    pub log_format: LogFormat,
    pub binance_api_key: Option<String>,
    pub bybit_api_key: Option<String>,
    pub symbols: Option<Vec<Symbol>>,
    pub oi_interval: Option<Duration>,
    pub funding_interval: Option<Duration>,
    pub liquidation_buffer: Option<usize>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let log_format = match get("PERPFLOW_LOG_FORMAT").as_deref().map(str::trim) {
            None => LogFormat::Text,
            Some(raw) if raw.eq_ignore_ascii_case("text") => LogFormat::Text,
            Some(raw) if raw.eq_ignore_ascii_case("json") => LogFormat::Json,
            Some(raw) => return Err(anyhow!("invalid PERPFLOW_LOG_FORMAT '{}'", raw)),
        };

        let symbols = get("PERPFLOW_SYMBOLS")
            .map(|raw| {
                raw.split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| Symbol::new(s).with_context(|| format!("invalid symbol '{}'", s)))
                    .collect::<anyhow::Result<Vec<_>>>()
            })
            .transpose()
            .context("invalid PERPFLOW_SYMBOLS")?;

        Ok(Self {
            catalog_path: get("PERPFLOW_CATALOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CATALOG_PATH)),
            log_format,
            binance_api_key: get("BINANCE_API_KEY"),
            bybit_api_key: get("BYBIT_API_KEY"),
            symbols,
            oi_interval: minutes(&get, "PERPFLOW_OI_INTERVAL_MINUTES")?,
            funding_interval: minutes(&get, "PERPFLOW_FUNDING_INTERVAL_MINUTES")?,
            liquidation_buffer: parse(&get, "PERPFLOW_LIQUIDATION_BUFFER")?,
        })
    }

    /// Daemon defaults with the environment applied.
    pub fn daemon_config(&self) -> DaemonConfig {
        let mut config = DaemonConfig::default();
        if let Some(symbols) = &self.symbols {
            config.symbols = symbols.clone();
        }
        if let Some(interval) = self.oi_interval {
            config.oi_interval = interval;
        }
        if let Some(interval) = self.funding_interval {
            config.funding_interval = interval;
        }
        if let Some(buffer) = self.liquidation_buffer {
            config.liquidation_buffer = buffer;
        }
        config
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| anyhow!("invalid {} '{}': {}", key, raw, e))
        })
        .transpose()
}

fn minutes(get: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<Duration>> {
    match parse::<u64>(get, key)? {
        Some(0) => Err(anyhow!("{} must be at least 1", key)),
        Some(m) => Ok(Some(Duration::from_secs(m * 60))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config(&[]).unwrap();
        assert_eq!(config.catalog_path, PathBuf::from(DEFAULT_CATALOG_PATH));
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.symbols.is_none());
        assert_eq!(config.daemon_config().liquidation_buffer, 100);
    }

    #[test]
    fn environment_overrides_daemon_defaults() {
        let config = config(&[
            ("PERPFLOW_SYMBOLS", "solusdt-perp, BTCUSDT-PERP"),
            ("PERPFLOW_OI_INTERVAL_MINUTES", "1"),
            ("PERPFLOW_LIQUIDATION_BUFFER", "25"),
            ("PERPFLOW_LOG_FORMAT", "JSON"),
        ])
        .unwrap();
        assert_eq!(config.log_format, LogFormat::Json);

        let daemon = config.daemon_config();
        assert_eq!(daemon.symbols.len(), 2);
        assert_eq!(daemon.symbols[0].as_str(), "SOLUSDT-PERP");
        assert_eq!(daemon.oi_interval, Duration::from_secs(60));
        assert_eq!(daemon.funding_interval, Duration::from_secs(3600));
        assert_eq!(daemon.liquidation_buffer, 25);
    }

    #[test]
    fn unparsable_values_are_fatal() {
        assert!(config(&[("PERPFLOW_OI_INTERVAL_MINUTES", "soon")]).is_err());
        assert!(config(&[("PERPFLOW_FUNDING_INTERVAL_MINUTES", "0")]).is_err());
        assert!(config(&[("PERPFLOW_SYMBOLS", "BTC/USDT")]).is_err());
        assert!(config(&[("PERPFLOW_LOG_FORMAT", "xml")]).is_err());
    }
}
