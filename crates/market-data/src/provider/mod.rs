//! Venue fetchers.
//!
//! Every venue adapter implements [`Fetcher`] and normalizes its wire
//! format into the crate's record types. Shared plumbing:
//!
//! - [`http`] - JSON requests with HTTP status classification
//! - [`ws`] - a lazily reconnected WebSocket feed with heartbeats
//! - [`paginate`] - cursor pagination over time-ordered endpoints

mod capabilities;
pub mod http;
mod pagination;
mod traits;
pub mod ws;

pub mod binance;
pub mod bybit;
pub mod hyperliquid;

pub use binance::{BinanceFetcher, BinanceSettings};
pub use bybit::{BybitFetcher, BybitSettings};
pub use capabilities::FetcherCapabilities;
pub use hyperliquid::{HyperliquidFetcher, HyperliquidSettings};
pub use pagination::paginate;
pub use traits::Fetcher;
