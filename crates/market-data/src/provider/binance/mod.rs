//! Binance USDⓈ-M futures fetcher.
//!
//! REST endpoints live under `fapi` (snapshots, funding history) and
//! `futures/data` (open-interest history). Liquidations come from the
//! `<symbol>@forceOrder` WebSocket stream.
//!
//! Public market data needs no credentials. When an API key is
//! configured it is sent as `X-MBX-APIKEY` for higher rate limits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use log::{debug, info};
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::errors::FetchError;
use crate::models::{notional, FundingRate, Liquidation, OpenInterest, Side, Symbol, Venue};
use crate::provider::http::{
    build_client, keep_valid, millis_to_utc, parse_decimal, send_json, REQUEST_TIMEOUT,
};
use crate::provider::pagination::paginate;
use crate::provider::ws::{FeedConfig, LiveFeed};
use crate::provider::{Fetcher, FetcherCapabilities};

const REST_URL: &str = "https://fapi.binance.com";
const WS_URL: &str = "wss://fstream.binance.com/ws";

/// Open-interest history page size (endpoint maximum).
const OI_HISTORY_LIMIT: u32 = 500;

/// Funding history page size (endpoint maximum).
const FUNDING_HISTORY_LIMIT: u32 = 1000;

/// Open-interest history bucket.
const OI_HISTORY_PERIOD: &str = "5m";

/// Binance error code for an unknown symbol.
const INVALID_SYMBOL_CODE: &str = "-1121";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenInterestResponse {
    open_interest: String,
    time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndexResponse {
    mark_price: String,
    last_funding_rate: String,
    next_funding_time: i64,
    time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenInterestHistEntry {
    sum_open_interest: String,
    sum_open_interest_value: String,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingRateEntry {
    funding_rate: String,
    funding_time: i64,
}

#[derive(Debug, Deserialize)]
struct ForceOrderEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "o")]
    order: ForceOrder,
}

#[derive(Debug, Deserialize)]
struct ForceOrder {
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "z", default)]
    filled_quantity: Option<String>,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "ap", default)]
    average_price: Option<String>,
    #[serde(rename = "T")]
    trade_time: i64,
}

/// Binance fetcher settings.
#[derive(Clone, Debug)]
pub struct BinanceSettings {
    pub rest_url: String,
    pub ws_url: String,
    pub api_key: Option<String>,
}

impl Default for BinanceSettings {
    fn default() -> Self {
        Self {
            rest_url: REST_URL.to_string(),
            ws_url: WS_URL.to_string(),
            api_key: None,
        }
    }
}

/// Binance USDⓈ-M perpetual futures fetcher.
pub struct BinanceFetcher {
    client: Client,
    settings: BinanceSettings,
    connected: AtomicBool,
    feeds: Mutex<HashMap<Symbol, Arc<LiveFeed>>>,
}

impl BinanceFetcher {
    pub fn new() -> Self {
        Self::with_settings(BinanceSettings::default())
    }

    pub fn with_settings(settings: BinanceSettings) -> Self {
        Self {
            client: build_client(REQUEST_TIMEOUT),
            settings,
            connected: AtomicBool::new(false),
            feeds: Mutex::new(HashMap::new()),
        }
    }

    /// `BTCUSDT-PERP` -> `BTCUSDT`
    fn market_id(symbol: &Symbol) -> &str {
        symbol.pair()
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self.client.get(format!("{}{}", self.settings.rest_url, path));
        match &self.settings.api_key {
            Some(key) => request.header("X-MBX-APIKEY", key),
            None => request,
        }
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        symbol: &Symbol,
        request: RequestBuilder,
    ) -> Result<T, FetchError> {
        send_json(request).await.map_err(|e| match e {
            FetchError::BadRequest(msg) if msg.contains(INVALID_SYMBOL_CODE) => {
                FetchError::UnsupportedSymbol(symbol.to_string())
            }
            other => other,
        })
    }

    async fn premium_index(&self, symbol: &Symbol) -> Result<PremiumIndexResponse, FetchError> {
        let request = self
            .get("/fapi/v1/premiumIndex")
            .query(&[("symbol", Self::market_id(symbol))]);
        self.request(symbol, request).await
    }

    async fn feed(&self, symbol: &Symbol) -> Arc<LiveFeed> {
        let mut feeds = self.feeds.lock().await;
        feeds
            .entry(symbol.clone())
            .or_insert_with(|| {
                let url = format!(
                    "{}/{}@forceOrder",
                    self.settings.ws_url,
                    Self::market_id(symbol).to_ascii_lowercase()
                );
                Arc::new(LiveFeed::new(FeedConfig::new(url)))
            })
            .clone()
    }
}

impl Default for BinanceFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for BinanceFetcher {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    fn capabilities(&self) -> FetcherCapabilities {
        FetcherCapabilities::default()
    }

    async fn connect(&self) -> Result<(), FetchError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _: serde_json::Value = send_json(self.get("/fapi/v1/ping")).await?;
        self.connected.store(true, Ordering::SeqCst);
        info!("Connected to {}", Venue::Binance);
        Ok(())
    }

    async fn close(&self) -> Result<(), FetchError> {
        let feeds: Vec<Arc<LiveFeed>> = self.feeds.lock().await.drain().map(|(_, f)| f).collect();
        for feed in feeds {
            feed.close().await;
        }
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("Closed {} connection", Venue::Binance);
        }
        Ok(())
    }

    async fn fetch_open_interest(&self, symbol: &Symbol) -> Result<OpenInterest, FetchError> {
        let oi_request = self
            .get("/fapi/v1/openInterest")
            .query(&[("symbol", Self::market_id(symbol))]);
        let (oi, premium) = tokio::try_join!(
            self.request::<OpenInterestResponse>(symbol, oi_request),
            self.premium_index(symbol)
        )?;
        let mark_price = parse_decimal("markPrice", &premium.mark_price)?;
        parse_open_interest(symbol, &oi, mark_price)
    }

    async fn fetch_funding_rate(&self, symbol: &Symbol) -> Result<FundingRate, FetchError> {
        let premium = self.premium_index(symbol).await?;
        parse_premium_index(symbol, &premium)
    }

    fn fetch_open_interest_history<'a>(
        &'a self,
        symbol: &'a Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxStream<'a, Result<OpenInterest, FetchError>> {
        paginate(
            start,
            end,
            move |since: DateTime<Utc>| async move {
                debug!("{} OI history for {} since {}", Venue::Binance, symbol, since);
                let request = self.get("/futures/data/openInterestHist").query(&[
                    ("symbol", Self::market_id(symbol).to_string()),
                    ("period", OI_HISTORY_PERIOD.to_string()),
                    ("limit", OI_HISTORY_LIMIT.to_string()),
                    ("startTime", since.timestamp_millis().to_string()),
                    ("endTime", end.timestamp_millis().to_string()),
                ]);
                let entries: Vec<OpenInterestHistEntry> = self.request(symbol, request).await?;
                parse_open_interest_page(symbol, &entries)
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
        paginate(
            start,
            end,
            move |since: DateTime<Utc>| async move {
                debug!("{} funding history for {} since {}", Venue::Binance, symbol, since);
                let request = self.get("/fapi/v1/fundingRate").query(&[
                    ("symbol", Self::market_id(symbol).to_string()),
                    ("limit", FUNDING_HISTORY_LIMIT.to_string()),
                    ("startTime", since.timestamp_millis().to_string()),
                    ("endTime", end.timestamp_millis().to_string()),
                ]);
                let entries: Vec<FundingRateEntry> = self.request(symbol, request).await?;
                keep_valid(
                    Venue::Binance,
                    "funding entry",
                    entries.iter().map(|entry| parse_funding_entry(symbol, entry)),
                )
            },
            FundingRate::timestamp,
        )
    }

    async fn watch_liquidations(&self, symbol: &Symbol) -> Result<Vec<Liquidation>, FetchError> {
        let feed = self.feed(symbol).await;
        loop {
            let text = feed.next_text().await?;
            let batch = frame_liquidations(symbol, &text)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
        }
    }
}

fn parse_open_interest(
    symbol: &Symbol,
    response: &OpenInterestResponse,
    mark_price: Decimal,
) -> Result<OpenInterest, FetchError> {
    let amount = parse_decimal("openInterest", &response.open_interest)?;
    Ok(OpenInterest::new(
        millis_to_utc(response.time)?,
        symbol.clone(),
        Venue::Binance,
        amount,
        notional("open_interest_value", amount, mark_price)?,
    )?)
}

fn parse_premium_index(
    symbol: &Symbol,
    response: &PremiumIndexResponse,
) -> Result<FundingRate, FetchError> {
    let next = match response.next_funding_time {
        0 => None,
        ms => Some(millis_to_utc(ms)?),
    };
    Ok(FundingRate::new(
        millis_to_utc(response.time)?,
        symbol.clone(),
        Venue::Binance,
        parse_decimal("lastFundingRate", &response.last_funding_rate)?,
    )?
    .with_next_funding_time(next))
}

fn parse_open_interest_hist(
    symbol: &Symbol,
    entry: &OpenInterestHistEntry,
) -> Result<OpenInterest, FetchError> {
    Ok(OpenInterest::new(
        millis_to_utc(entry.timestamp)?,
        symbol.clone(),
        Venue::Binance,
        parse_decimal("sumOpenInterest", &entry.sum_open_interest)?,
        parse_decimal("sumOpenInterestValue", &entry.sum_open_interest_value)?,
    )?)
}

fn parse_open_interest_page(
    symbol: &Symbol,
    entries: &[OpenInterestHistEntry],
) -> Result<Vec<OpenInterest>, FetchError> {
    keep_valid(
        Venue::Binance,
        "OI history entry",
        entries.iter().map(|entry| parse_open_interest_hist(symbol, entry)),
    )
}

fn parse_funding_entry(
    symbol: &Symbol,
    entry: &FundingRateEntry,
) -> Result<FundingRate, FetchError> {
    Ok(FundingRate::new(
        millis_to_utc(entry.funding_time)?,
        symbol.clone(),
        Venue::Binance,
        parse_decimal("fundingRate", &entry.funding_rate)?,
    )?)
}

/// Liquidations in one stream frame. An invalid order is dropped.
fn frame_liquidations(symbol: &Symbol, text: &str) -> Result<Vec<Liquidation>, FetchError> {
    keep_valid(
        Venue::Binance,
        "liquidation",
        parse_force_order(symbol, text).transpose(),
    )
}

/// Parse a `forceOrder` frame. Non-liquidation frames yield `None`.
///
/// The order side is the side of the forced order: a SELL closes a long
/// position, a BUY closes a short one.
fn parse_force_order(symbol: &Symbol, text: &str) -> Result<Option<Liquidation>, FetchError> {
    let event: ForceOrderEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(_) => {
            debug!("Ignoring non-liquidation frame from {}: {}", Venue::Binance, text);
            return Ok(None);
        }
    };
    if event.event_type != "forceOrder" {
        return Ok(None);
    }

    let order = event.order;
    let side = match order.side.to_ascii_uppercase().as_str() {
        "SELL" => Side::Long,
        "BUY" => Side::Short,
        other => {
            return Err(FetchError::InvalidResponse(format!(
                "unknown forceOrder side '{}'",
                other
            )))
        }
    };
    let quantity = positive_or(order.filled_quantity.as_deref(), &order.quantity, "q")?;
    let price = positive_or(order.average_price.as_deref(), &order.price, "p")?;

    Ok(Some(Liquidation::new(
        millis_to_utc(order.trade_time)?,
        symbol.clone(),
        Venue::Binance,
        side,
        quantity,
        price,
    )?))
}

/// Prefer `preferred` when it parses to a positive number.
fn positive_or(
    preferred: Option<&str>,
    fallback: &str,
    field: &str,
) -> Result<Decimal, FetchError> {
    if let Some(value) = preferred.and_then(|raw| parse_decimal(field, raw).ok()) {
        if value > Decimal::ZERO {
            return Ok(value);
        }
    }
    parse_decimal(field, fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ValidationError;
    use rust_decimal_macros::dec;

    fn btc() -> Symbol {
        Symbol::new("BTCUSDT-PERP").unwrap()
    }

    #[test]
    fn market_id_strips_contract_suffix() {
        assert_eq!(BinanceFetcher::market_id(&btc()), "BTCUSDT");
    }

    #[test]
    fn open_interest_is_valued_at_mark_price() {
        let response: OpenInterestResponse = serde_json::from_str(
            r#"{"openInterest":"10659.509","symbol":"BTCUSDT","time":1589437530011}"#,
        )
        .unwrap();
        let oi = parse_open_interest(&btc(), &response, dec!(2)).unwrap();
        assert_eq!(oi.amount(), dec!(10659.509));
        assert_eq!(oi.value(), dec!(21319.018));
        assert_eq!(oi.timestamp().timestamp_millis(), 1589437530011);
        assert_eq!(oi.symbol().as_str(), "BTCUSDT-PERP");
    }

    #[test]
    fn premium_index_parses_funding() {
        let response: PremiumIndexResponse = serde_json::from_str(
            r#"{"symbol":"BTCUSDT","markPrice":"11793.63104562","indexPrice":"11781.80495970",
                "estimatedSettlePrice":"11781.16138815","lastFundingRate":"0.00038246",
                "interestRate":"0.00010000","nextFundingTime":1597392000000,"time":1597370495002}"#,
        )
        .unwrap();
        let rate = parse_premium_index(&btc(), &response).unwrap();
        assert_eq!(rate.rate(), dec!(0.00038246));
        assert_eq!(
            rate.next_funding_time().unwrap().timestamp_millis(),
            1597392000000
        );
    }

    #[test]
    fn history_entries_parse() {
        let entries: Vec<OpenInterestHistEntry> = serde_json::from_str(
            r#"[{"symbol":"BTCUSDT","sumOpenInterest":"20403.63700000",
                 "sumOpenInterestValue":"150570784.07809979","timestamp":1583127900000}]"#,
        )
        .unwrap();
        let oi = parse_open_interest_hist(&btc(), &entries[0]).unwrap();
        assert_eq!(oi.value(), dec!(150570784.07809979));

        let funding: Vec<FundingRateEntry> = serde_json::from_str(
            r#"[{"symbol":"BTCUSDT","fundingRate":"-0.03750000","fundingTime":1570608000000,
                 "markPrice":"34287.54619963"}]"#,
        )
        .unwrap();
        let rate = parse_funding_entry(&btc(), &funding[0]).unwrap();
        assert_eq!(rate.rate(), dec!(-0.0375));
    }

    #[test]
    fn force_order_sell_is_long_liquidation() {
        let text = r#"{"e":"forceOrder","E":1568014460893,"o":{"s":"BTCUSDT","S":"SELL","o":"LIMIT",
            "f":"IOC","q":"0.014","p":"9910","ap":"9910","X":"FILLED","l":"0.014","z":"0.014",
            "T":1568014460893}}"#;
        let liq = parse_force_order(&btc(), text).unwrap().unwrap();
        assert_eq!(liq.side(), Side::Long);
        assert_eq!(liq.quantity(), dec!(0.014));
        assert_eq!(liq.price(), dec!(9910));
        assert_eq!(liq.value(), dec!(138.74));
    }

    #[test]
    fn force_order_buy_is_short_liquidation() {
        let text = r#"{"e":"forceOrder","E":1,"o":{"s":"BTCUSDT","S":"BUY","q":"2","p":"100",
            "ap":"0","z":"0","T":1568014460893}}"#;
        let liq = parse_force_order(&btc(), text).unwrap().unwrap();
        assert_eq!(liq.side(), Side::Short);
        assert_eq!(liq.quantity(), dec!(2));
        assert_eq!(liq.price(), dec!(100));
    }

    #[test]
    fn zero_quantity_frame_is_dropped_and_stream_continues() {
        let bad = r#"{"e":"forceOrder","E":1,"o":{"s":"BTCUSDT","S":"BUY","q":"0","p":"100",
            "ap":"0","z":"0","T":1568014460893}}"#;
        let good = r#"{"e":"forceOrder","E":2,"o":{"s":"BTCUSDT","S":"SELL","q":"1","p":"100",
            "T":1568014460894}}"#;
        assert!(matches!(
            parse_force_order(&btc(), bad),
            Err(FetchError::Validation(_))
        ));

        let delivered: Vec<Liquidation> = [bad, good]
            .iter()
            .flat_map(|frame| frame_liquidations(&btc(), frame).unwrap())
            .collect();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].side(), Side::Long);
    }

    #[test]
    fn oversized_frame_is_rejected_without_panicking() {
        let text = r#"{"e":"forceOrder","E":1,"o":{"s":"BTCUSDT","S":"SELL",
            "q":"100000000000000000000","p":"100000000000000000000","T":1568014460893}}"#;
        assert!(matches!(
            parse_force_order(&btc(), text),
            Err(FetchError::Validation(ValidationError::Overflow { .. }))
        ));
        assert!(frame_liquidations(&btc(), text).unwrap().is_empty());

        let response: OpenInterestResponse = serde_json::from_str(
            r#"{"openInterest":"100000000000000000000","symbol":"BTCUSDT","time":1589437530011}"#,
        )
        .unwrap();
        let huge = Decimal::from_str_exact("100000000000000000000").unwrap();
        assert!(parse_open_interest(&btc(), &response, huge).is_err());
    }

    #[test]
    fn history_page_drops_invalid_entries() {
        let entries: Vec<OpenInterestHistEntry> = serde_json::from_str(
            r#"[{"symbol":"BTCUSDT","sumOpenInterest":"10","sumOpenInterestValue":"100",
                 "timestamp":1583127900000},
                {"symbol":"BTCUSDT","sumOpenInterest":"-5","sumOpenInterestValue":"100",
                 "timestamp":1583128200000},
                {"symbol":"BTCUSDT","sumOpenInterest":"12","sumOpenInterestValue":"120",
                 "timestamp":1583128500000}]"#,
        )
        .unwrap();
        let page = parse_open_interest_page(&btc(), &entries).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[1].amount(), dec!(12));
    }

    #[test]
    fn unrelated_frames_are_skipped() {
        assert!(parse_force_order(&btc(), r#"{"result":null,"id":1}"#)
            .unwrap()
            .is_none());
    }
}
