//! Bybit v5 linear perpetuals fetcher.
//!
//! Snapshots come from `/v5/market/tickers`. History endpoints return the
//! newest entries of the requested window first, so pages are requested
//! over bounded windows and re-sorted ascending by the paginator.
//! Liquidations come from the public `allLiquidation.<symbol>` topic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::BoxStream;
use log::{debug, info};
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::errors::FetchError;
use crate::models::{FundingRate, Liquidation, OpenInterest, Side, Symbol, Venue};
use crate::provider::http::{
    build_client, keep_valid, millis_to_utc, parse_decimal, parse_millis, send_json,
    REQUEST_TIMEOUT,
};
use crate::provider::pagination::paginate;
use crate::provider::ws::{FeedConfig, LiveFeed};
use crate::provider::{Fetcher, FetcherCapabilities};

const REST_URL: &str = "https://api.bybit.com";
const WS_URL: &str = "wss://stream.bybit.com/v5/public/linear";

/// Page size for open-interest history (endpoint maximum).
const OI_HISTORY_LIMIT: i64 = 200;

/// Page size for funding history (endpoint maximum).
const FUNDING_HISTORY_LIMIT: i64 = 200;

/// Open-interest history bucket and its width.
const OI_INTERVAL: &str = "5min";
const OI_INTERVAL_MINUTES: i64 = 5;

/// Funding settles every eight hours on most linear contracts.
const FUNDING_INTERVAL_HOURS: i64 = 8;

/// Bybit closes public connections that stay silent for too long.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    ret_code: i64,
    ret_msg: String,
    result: Option<T>,
    time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ListResult<T> {
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker {
    open_interest: String,
    open_interest_value: String,
    funding_rate: String,
    next_funding_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenInterestEntry {
    open_interest: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingEntry {
    funding_rate: String,
    funding_rate_timestamp: String,
}

#[derive(Debug, Deserialize)]
struct LiquidationMessage {
    topic: Option<String>,
    #[serde(default)]
    data: Vec<LiquidationEntry>,
}

#[derive(Debug, Deserialize)]
struct LiquidationEntry {
    #[serde(rename = "T")]
    time: i64,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "v")]
    size: String,
    #[serde(rename = "p")]
    price: String,
}

/// Map a non-zero `retCode` to a classified error.
fn ret_code_error(code: i64, message: &str) -> FetchError {
    let message = format!("retCode {}: {}", code, message);
    match code {
        10006 | 10018 => FetchError::RateLimited {
            message,
            retry_after: None,
        },
        10003 | 10004 | 10005 | 33004 => FetchError::Authentication(message),
        10000 | 10016 => FetchError::Unavailable(message),
        _ => FetchError::BadRequest(message),
    }
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<(T, Option<i64>), FetchError> {
    if envelope.ret_code != 0 {
        return Err(ret_code_error(envelope.ret_code, &envelope.ret_msg));
    }
    let result = envelope
        .result
        .ok_or_else(|| FetchError::InvalidResponse("missing result".to_string()))?;
    Ok((result, envelope.time))
}

/// Bybit fetcher settings.
#[derive(Clone, Debug)]
pub struct BybitSettings {
    pub rest_url: String,
    pub ws_url: String,
    pub api_key: Option<String>,
}

impl Default for BybitSettings {
    fn default() -> Self {
        Self {
            rest_url: REST_URL.to_string(),
            ws_url: WS_URL.to_string(),
            api_key: None,
        }
    }
}

/// Bybit linear perpetual fetcher.
pub struct BybitFetcher {
    client: Client,
    settings: BybitSettings,
    connected: AtomicBool,
    feeds: Mutex<HashMap<Symbol, Arc<LiveFeed>>>,
}

impl BybitFetcher {
    pub fn new() -> Self {
        Self::with_settings(BybitSettings::default())
    }

    pub fn with_settings(settings: BybitSettings) -> Self {
        Self {
            client: build_client(REQUEST_TIMEOUT),
            settings,
            connected: AtomicBool::new(false),
            feeds: Mutex::new(HashMap::new()),
        }
    }

    fn market_id(symbol: &Symbol) -> &str {
        symbol.pair()
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self.client.get(format!("{}{}", self.settings.rest_url, path));
        match &self.settings.api_key {
            Some(key) => request.header("X-BAPI-API-KEY", key),
            None => request,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        symbol: &Symbol,
        request: RequestBuilder,
    ) -> Result<(T, Option<i64>), FetchError> {
        let envelope: Envelope<T> = send_json(request).await?;
        unwrap_envelope(envelope).map_err(|e| match e {
            FetchError::BadRequest(msg) if msg.contains("10001") && msg.contains("symbol") => {
                FetchError::UnsupportedSymbol(symbol.to_string())
            }
            other => other,
        })
    }

    async fn ticker(&self, symbol: &Symbol) -> Result<(Ticker, DateTime<Utc>), FetchError> {
        let request = self.get("/v5/market/tickers").query(&[
            ("category", "linear"),
            ("symbol", Self::market_id(symbol)),
        ]);
        let (result, time): (ListResult<Ticker>, _) = self.call(symbol, request).await?;
        let ticker = result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::UnsupportedSymbol(symbol.to_string()))?;
        let timestamp = match time {
            Some(ms) => millis_to_utc(ms)?,
            None => Utc::now(),
        };
        Ok((ticker, timestamp))
    }

    async fn feed(&self, symbol: &Symbol) -> Arc<LiveFeed> {
        let mut feeds = self.feeds.lock().await;
        feeds
            .entry(symbol.clone())
            .or_insert_with(|| {
                let subscribe = serde_json::json!({
                    "op": "subscribe",
                    "args": [format!("allLiquidation.{}", Self::market_id(symbol))],
                })
                .to_string();
                let config = FeedConfig::new(self.settings.ws_url.clone())
                    .with_subscription(subscribe)
                    .with_heartbeat(HEARTBEAT_INTERVAL, r#"{"op":"ping"}"#);
                Arc::new(LiveFeed::new(config))
            })
            .clone()
    }
}

impl Default for BybitFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// End of the page window starting at `since`, capped at `end`.
fn window_end(since: DateTime<Utc>, span: TimeDelta, end: DateTime<Utc>) -> DateTime<Utc> {
    (since + span - TimeDelta::milliseconds(1)).min(end)
}

#[async_trait]
impl Fetcher for BybitFetcher {
    fn venue(&self) -> Venue {
        Venue::Bybit
    }

    fn capabilities(&self) -> FetcherCapabilities {
        FetcherCapabilities::default()
    }

    async fn connect(&self) -> Result<(), FetchError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        let envelope: Envelope<serde_json::Value> = send_json(self.get("/v5/market/time")).await?;
        unwrap_envelope(envelope)?;
        self.connected.store(true, Ordering::SeqCst);
        info!("Connected to {}", Venue::Bybit);
        Ok(())
    }

    async fn close(&self) -> Result<(), FetchError> {
        let feeds: Vec<Arc<LiveFeed>> = self.feeds.lock().await.drain().map(|(_, f)| f).collect();
        for feed in feeds {
            feed.close().await;
        }
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("Closed {} connection", Venue::Bybit);
        }
        Ok(())
    }

    async fn fetch_open_interest(&self, symbol: &Symbol) -> Result<OpenInterest, FetchError> {
        let (ticker, timestamp) = self.ticker(symbol).await?;
        parse_ticker_open_interest(symbol, &ticker, timestamp)
    }

    async fn fetch_funding_rate(&self, symbol: &Symbol) -> Result<FundingRate, FetchError> {
        let (ticker, timestamp) = self.ticker(symbol).await?;
        parse_ticker_funding(symbol, &ticker, timestamp)
    }

    fn fetch_open_interest_history<'a>(
        &'a self,
        symbol: &'a Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxStream<'a, Result<OpenInterest, FetchError>> {
        let span = TimeDelta::minutes(OI_INTERVAL_MINUTES * OI_HISTORY_LIMIT);
        paginate(
            start,
            end,
            move |since: DateTime<Utc>| async move {
                let until = window_end(since, span, end);
                debug!("{} OI history for {} {}..{}", Venue::Bybit, symbol, since, until);
                let request = self.get("/v5/market/open-interest").query(&[
                    ("category", "linear".to_string()),
                    ("symbol", Self::market_id(symbol).to_string()),
                    ("intervalTime", OI_INTERVAL.to_string()),
                    ("limit", OI_HISTORY_LIMIT.to_string()),
                    ("startTime", since.timestamp_millis().to_string()),
                    ("endTime", until.timestamp_millis().to_string()),
                ]);
                let (result, _): (ListResult<OpenInterestEntry>, _) =
                    self.call(symbol, request).await?;
                parse_open_interest_page(symbol, &result.list)
            },
            OpenInterest::timestamp,
        )
    }

    fn fetch_funding_rate_history<'a>(
        &'a self,
        symbol: &'a Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxStream<'a, Result<FundingRate, FetchError>> {
        let span = TimeDelta::hours(FUNDING_INTERVAL_HOURS * FUNDING_HISTORY_LIMIT);
        paginate(
            start,
            end,
            move |since: DateTime<Utc>| async move {
                let until = window_end(since, span, end);
                debug!("{} funding history for {} {}..{}", Venue::Bybit, symbol, since, until);
                let request = self.get("/v5/market/funding/history").query(&[
                    ("category", "linear".to_string()),
                    ("symbol", Self::market_id(symbol).to_string()),
                    ("limit", FUNDING_HISTORY_LIMIT.to_string()),
                    ("startTime", since.timestamp_millis().to_string()),
                    ("endTime", until.timestamp_millis().to_string()),
                ]);
                let (result, _): (ListResult<FundingEntry>, _) = self.call(symbol, request).await?;
                keep_valid(
                    Venue::Bybit,
                    "funding entry",
                    result.list.iter().map(|entry| parse_funding_entry(symbol, entry)),
                )
            },
            FundingRate::timestamp,
        )
    }

    async fn watch_liquidations(&self, symbol: &Symbol) -> Result<Vec<Liquidation>, FetchError> {
        let feed = self.feed(symbol).await;
        loop {
            let text = feed.next_text().await?;
            let batch = parse_liquidation_message(symbol, &text)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
        }
    }
}

fn parse_ticker_open_interest(
    symbol: &Symbol,
    ticker: &Ticker,
    timestamp: DateTime<Utc>,
) -> Result<OpenInterest, FetchError> {
    Ok(OpenInterest::new(
        timestamp,
        symbol.clone(),
        Venue::Bybit,
        parse_decimal("openInterest", &ticker.open_interest)?,
        parse_decimal("openInterestValue", &ticker.open_interest_value)?,
    )?)
}

fn parse_ticker_funding(
    symbol: &Symbol,
    ticker: &Ticker,
    timestamp: DateTime<Utc>,
) -> Result<FundingRate, FetchError> {
    let next = match ticker.next_funding_time.trim() {
        "" | "0" => None,
        raw => Some(parse_millis("nextFundingTime", raw)?),
    };
    Ok(FundingRate::new(
        timestamp,
        symbol.clone(),
        Venue::Bybit,
        parse_decimal("fundingRate", &ticker.funding_rate)?,
    )?
    .with_next_funding_time(next))
}

/// History entries carry no notional value; it is recorded as zero.
fn parse_open_interest_entry(
    symbol: &Symbol,
    entry: &OpenInterestEntry,
) -> Result<OpenInterest, FetchError> {
    Ok(OpenInterest::new(
        parse_millis("timestamp", &entry.timestamp)?,
        symbol.clone(),
        Venue::Bybit,
        parse_decimal("openInterest", &entry.open_interest)?,
        Decimal::ZERO,
    )?)
}

fn parse_open_interest_page(
    symbol: &Symbol,
    entries: &[OpenInterestEntry],
) -> Result<Vec<OpenInterest>, FetchError> {
    keep_valid(
        Venue::Bybit,
        "OI history entry",
        entries.iter().map(|entry| parse_open_interest_entry(symbol, entry)),
    )
}

fn parse_funding_entry(symbol: &Symbol, entry: &FundingEntry) -> Result<FundingRate, FetchError> {
    Ok(FundingRate::new(
        parse_millis("fundingRateTimestamp", &entry.funding_rate_timestamp)?,
        symbol.clone(),
        Venue::Bybit,
        parse_decimal("fundingRate", &entry.funding_rate)?,
    )?)
}

/// Parse an `allLiquidation` push. Control frames (pong, subscribe acks)
/// yield an empty batch.
///
/// `S` is the side of the liquidated position: `Buy` for longs,
/// `Sell` for shorts. Entries that fail validation are dropped.
fn parse_liquidation_message(symbol: &Symbol, text: &str) -> Result<Vec<Liquidation>, FetchError> {
    let message: LiquidationMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(_) => {
            debug!("Ignoring frame from {}: {}", Venue::Bybit, text);
            return Ok(Vec::new());
        }
    };
    let is_liquidation = message
        .topic
        .as_deref()
        .map(|topic| topic.starts_with("allLiquidation."))
        .unwrap_or(false);
    if !is_liquidation {
        return Ok(Vec::new());
    }

    let entries = message.data.iter().map(|entry| {
        let side = match entry.side.as_str() {
            "Buy" => Side::Long,
            "Sell" => Side::Short,
            other => {
                return Err(FetchError::InvalidResponse(format!(
                    "unknown liquidation side '{}'",
                    other
                )))
            }
        };
        Ok(Liquidation::new(
            millis_to_utc(entry.time)?,
            symbol.clone(),
            Venue::Bybit,
            side,
            parse_decimal("v", &entry.size)?,
            parse_decimal("p", &entry.price)?,
        )?)
    });
    keep_valid(Venue::Bybit, "liquidation", entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn btc() -> Symbol {
        Symbol::new("BTCUSDT-PERP").unwrap()
    }

    #[test]
    fn ticker_envelope_parses() {
        let envelope: Envelope<ListResult<Ticker>> = serde_json::from_str(
            r#"{"retCode":0,"retMsg":"OK","result":{"category":"linear","list":[{
                "symbol":"BTCUSDT","lastPrice":"16597.00","markPrice":"16596.00",
                "openInterest":"373504.107","openInterestValue":"6198674077.37",
                "fundingRate":"-0.000212","nextFundingTime":"1672387200000"}]},
                "time":1672376496682}"#,
        )
        .unwrap();
        let (result, time) = unwrap_envelope(envelope).unwrap();
        let ts = millis_to_utc(time.unwrap()).unwrap();
        let ticker = &result.list[0];

        let oi = parse_ticker_open_interest(&btc(), ticker, ts).unwrap();
        assert_eq!(oi.amount(), dec!(373504.107));
        assert_eq!(oi.value(), dec!(6198674077.37));

        let funding = parse_ticker_funding(&btc(), ticker, ts).unwrap();
        assert_eq!(funding.rate(), dec!(-0.000212));
        assert_eq!(
            funding.next_funding_time().unwrap().timestamp_millis(),
            1672387200000
        );
    }

    #[test]
    fn non_zero_ret_code_is_classified() {
        let envelope: Envelope<serde_json::Value> =
            serde_json::from_str(r#"{"retCode":10006,"retMsg":"Too many visits!","result":{}}"#)
                .unwrap();
        assert!(matches!(
            unwrap_envelope(envelope),
            Err(FetchError::RateLimited { .. })
        ));
        assert!(matches!(
            ret_code_error(10003, "invalid key"),
            FetchError::Authentication(_)
        ));
        assert!(matches!(
            ret_code_error(10001, "params error"),
            FetchError::BadRequest(_)
        ));
    }

    #[test]
    fn history_entries_parse() {
        let entries: ListResult<OpenInterestEntry> = serde_json::from_str(
            r#"{"list":[{"openInterest":"461134384.00000000","timestamp":"1669571400000"},
                        {"openInterest":"461134292.00000000","timestamp":"1669571100000"}]}"#,
        )
        .unwrap();
        let oi = parse_open_interest_entry(&btc(), &entries.list[1]).unwrap();
        assert_eq!(oi.amount(), dec!(461134292));
        assert_eq!(oi.value(), Decimal::ZERO);

        let funding: ListResult<FundingEntry> = serde_json::from_str(
            r#"{"list":[{"symbol":"BTCUSDT","fundingRate":"-0.005",
                        "fundingRateTimestamp":"1652112000000"}]}"#,
        )
        .unwrap();
        let rate = parse_funding_entry(&btc(), &funding.list[0]).unwrap();
        assert_eq!(rate.rate(), dec!(-0.005));
        assert_eq!(rate.timestamp().timestamp_millis(), 1652112000000);
    }

    #[test]
    fn liquidation_push_parses_sides() {
        let text = r#"{"topic":"allLiquidation.BTCUSDT","type":"snapshot","ts":1739502303204,
            "data":[{"T":1739502302929,"s":"BTCUSDT","S":"Sell","v":"20000","p":"0.04499"},
                    {"T":1739502302930,"s":"BTCUSDT","S":"Buy","v":"0.5","p":"96000"}]}"#;
        let batch = parse_liquidation_message(&btc(), text).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].side(), Side::Short);
        assert_eq!(batch[1].side(), Side::Long);
        assert_eq!(batch[1].value(), dec!(48000));
    }

    #[test]
    fn zero_size_liquidation_is_dropped_from_batch() {
        let text = r#"{"topic":"allLiquidation.BTCUSDT","type":"snapshot","ts":1739502303204,
            "data":[{"T":1739502302929,"s":"BTCUSDT","S":"Sell","v":"0","p":"96000"},
                    {"T":1739502302930,"s":"BTCUSDT","S":"Buy","v":"0.5","p":"96000"}]}"#;
        let batch = parse_liquidation_message(&btc(), text).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].quantity(), dec!(0.5));
    }

    #[test]
    fn unknown_side_still_fails_the_frame() {
        let text = r#"{"topic":"allLiquidation.BTCUSDT","ts":1739502303204,
            "data":[{"T":1739502302929,"s":"BTCUSDT","S":"Hold","v":"1","p":"96000"}]}"#;
        assert!(matches!(
            parse_liquidation_message(&btc(), text),
            Err(FetchError::InvalidResponse(_))
        ));
    }

    #[test]
    fn history_page_drops_negative_open_interest() {
        let list: ListResult<OpenInterestEntry> = serde_json::from_str(
            r#"{"list":[{"openInterest":"100","timestamp":"1700000000000"},
                        {"openInterest":"-3","timestamp":"1700000300000"},
                        {"openInterest":"120","timestamp":"1700000600000"}]}"#,
        )
        .unwrap();
        let page = parse_open_interest_page(&btc(), &list.list).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].amount(), dec!(100));
        assert_eq!(page[1].amount(), dec!(120));
    }

    #[test]
    fn control_frames_yield_empty_batches() {
        let pong = r#"{"success":true,"ret_msg":"pong","op":"ping"}"#;
        assert!(parse_liquidation_message(&btc(), pong).unwrap().is_empty());
        assert!(parse_liquidation_message(&btc(), "not json").unwrap().is_empty());
    }

    #[test]
    fn windows_are_capped_at_end() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap();
        assert_eq!(
            window_end(since, TimeDelta::hours(1), end),
            since + TimeDelta::hours(1) - TimeDelta::milliseconds(1)
        );
        assert_eq!(window_end(since, TimeDelta::days(3), end), end);
    }
}
