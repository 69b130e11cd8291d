//! Hyperliquid perpetuals fetcher.
//!
//! Every query is a `POST /info` with a `type` discriminator. Snapshots come
//! from `metaAndAssetCtxs`, whose `universe` and asset-context arrays are
//! index-aligned. Funding settles hourly and is stored per hour.
//!
//! Hyperliquid publishes no open-interest history and no public liquidation
//! feed, so those capabilities are off.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use futures::stream::BoxStream;
use log::{debug, info};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::errors::FetchError;
use crate::models::{notional, FundingRate, OpenInterest, Symbol, Venue};
use crate::provider::http::{
    build_client, keep_valid, millis_to_utc, parse_decimal, send_json, REQUEST_TIMEOUT,
};
use crate::provider::pagination::paginate;
use crate::provider::{Fetcher, FetcherCapabilities};

const API_URL: &str = "https://api.hyperliquid.xyz";

#[derive(Debug, Deserialize)]
struct Meta {
    universe: Vec<AssetMeta>,
}

#[derive(Debug, Deserialize)]
struct AssetMeta {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetContext {
    funding: String,
    open_interest: String,
    mark_px: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingHistoryEntry {
    funding_rate: String,
    time: i64,
}

/// Hyperliquid fetcher settings.
#[derive(Clone, Debug)]
pub struct HyperliquidSettings {
    pub api_url: String,
}

impl Default for HyperliquidSettings {
    fn default() -> Self {
        Self {
            api_url: API_URL.to_string(),
        }
    }
}

/// Hyperliquid perpetual fetcher.
pub struct HyperliquidFetcher {
    client: Client,
    settings: HyperliquidSettings,
    connected: AtomicBool,
}

impl HyperliquidFetcher {
    pub fn new() -> Self {
        Self::with_settings(HyperliquidSettings::default())
    }

    pub fn with_settings(settings: HyperliquidSettings) -> Self {
        Self {
            client: build_client(REQUEST_TIMEOUT),
            settings,
            connected: AtomicBool::new(false),
        }
    }

    /// `BTCUSDT-PERP` -> `BTC`
    fn coin(symbol: &Symbol) -> &str {
        symbol.base_asset()
    }

    fn info(&self, body: serde_json::Value) -> RequestBuilder {
        self.client
            .post(format!("{}/info", self.settings.api_url))
            .json(&body)
    }

    async fn query<T: DeserializeOwned>(&self, body: serde_json::Value) -> Result<T, FetchError> {
        send_json(self.info(body)).await
    }

    async fn asset_context(&self, symbol: &Symbol) -> Result<AssetContext, FetchError> {
        let response: (Meta, Vec<AssetContext>) =
            self.query(json!({ "type": "metaAndAssetCtxs" })).await?;
        select_asset(symbol, response)
    }
}

impl Default for HyperliquidFetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn select_asset(
    symbol: &Symbol,
    (meta, contexts): (Meta, Vec<AssetContext>),
) -> Result<AssetContext, FetchError> {
    let coin = HyperliquidFetcher::coin(symbol);
    let index = meta
        .universe
        .iter()
        .position(|asset| asset.name.eq_ignore_ascii_case(coin))
        .ok_or_else(|| FetchError::UnsupportedSymbol(symbol.to_string()))?;
    contexts.into_iter().nth(index).ok_or_else(|| {
        FetchError::InvalidResponse(format!("no asset context for {} at index {}", coin, index))
    })
}

/// Funding settles at the top of every hour.
fn next_funding_hour(now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    now.duration_trunc(TimeDelta::hours(1))
        .ok()
        .map(|hour| hour + TimeDelta::hours(1))
}

#[async_trait]
impl Fetcher for HyperliquidFetcher {
    fn venue(&self) -> Venue {
        Venue::Hyperliquid
    }

    fn capabilities(&self) -> FetcherCapabilities {
        FetcherCapabilities {
            supports_open_interest_history: false,
            supports_liquidation_stream: false,
            ..FetcherCapabilities::default()
        }
    }

    async fn connect(&self) -> Result<(), FetchError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _: serde_json::Value = self.query(json!({ "type": "meta" })).await?;
        self.connected.store(true, Ordering::SeqCst);
        info!("Connected to {}", Venue::Hyperliquid);
        Ok(())
    }

    async fn close(&self) -> Result<(), FetchError> {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("Closed {} connection", Venue::Hyperliquid);
        }
        Ok(())
    }

    async fn fetch_open_interest(&self, symbol: &Symbol) -> Result<OpenInterest, FetchError> {
        let context = self.asset_context(symbol).await?;
        parse_open_interest(symbol, &context, Utc::now())
    }

    async fn fetch_funding_rate(&self, symbol: &Symbol) -> Result<FundingRate, FetchError> {
        let context = self.asset_context(symbol).await?;
        parse_funding(symbol, &context, Utc::now())
    }

    fn fetch_funding_rate_history<'a>(
        &'a self,
        symbol: &'a Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxStream<'a, Result<FundingRate, FetchError>> {
        paginate(
            start,
            end,
            move |since: DateTime<Utc>| async move {
                debug!("{} funding history for {} since {}", Venue::Hyperliquid, symbol, since);
                let entries: Vec<FundingHistoryEntry> = self
                    .query(json!({
                        "type": "fundingHistory",
                        "coin": Self::coin(symbol),
                        "startTime": since.timestamp_millis(),
                        "endTime": end.timestamp_millis(),
                    }))
                    .await?;
                parse_funding_page(symbol, &entries)
            },
            FundingRate::timestamp,
        )
    }
}

fn parse_open_interest(
    symbol: &Symbol,
    context: &AssetContext,
    timestamp: DateTime<Utc>,
) -> Result<OpenInterest, FetchError> {
    let amount = parse_decimal("openInterest", &context.open_interest)?;
    let mark_price = parse_decimal("markPx", &context.mark_px)?;
    Ok(OpenInterest::new(
        timestamp,
        symbol.clone(),
        Venue::Hyperliquid,
        amount,
        notional("open_interest_value", amount, mark_price)?,
    )?)
}

fn parse_funding(
    symbol: &Symbol,
    context: &AssetContext,
    timestamp: DateTime<Utc>,
) -> Result<FundingRate, FetchError> {
    Ok(FundingRate::new(
        timestamp,
        symbol.clone(),
        Venue::Hyperliquid,
        parse_decimal("funding", &context.funding)?,
    )?
    .with_next_funding_time(next_funding_hour(timestamp)))
}

fn parse_funding_entry(
    symbol: &Symbol,
    entry: &FundingHistoryEntry,
) -> Result<FundingRate, FetchError> {
    Ok(FundingRate::new(
        millis_to_utc(entry.time)?,
        symbol.clone(),
        Venue::Hyperliquid,
        parse_decimal("fundingRate", &entry.funding_rate)?,
    )?)
}

fn parse_funding_page(
    symbol: &Symbol,
    entries: &[FundingHistoryEntry],
) -> Result<Vec<FundingRate>, FetchError> {
    keep_valid(
        Venue::Hyperliquid,
        "funding entry",
        entries.iter().map(|entry| parse_funding_entry(symbol, entry)),
    )
}
