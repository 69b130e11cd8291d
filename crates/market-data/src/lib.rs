//! Perpflow Market Data Crate
//!
//! Venue-agnostic collection of derivatives telemetry: open interest,
//! funding rates and liquidations from perpetual futures venues.
//!
//! # Overview
//!
//! The crate supports:
//! - Multiple venues: Binance USDⓈ-M, Bybit linear, Hyperliquid
//! - Snapshot, paginated history and live liquidation streams
//! - Retry with backoff, circuit breaking and reconnecting streams
//! - Concurrent fan-out across venues with per-venue results
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |   Orchestrator   |  (fan-out, validation)
//! +------------------+
//!          |
//!          v
//! +------------------+
//! |    Resilience    |  (retry -> circuit breaker -> call)
//! +------------------+
//!          |
//!          v
//! +------------------+
//! |     Fetcher      |  (Binance, Bybit, Hyperliquid)
//! +------------------+
//!          |
//!          v
//! +------------------+
//! |     Records      |  (OpenInterest, FundingRate, Liquidation)
//! +------------------+
//! ```
//!
//! # Core Types
//!
//! - [`Symbol`] - Canonical instrument symbol, e.g. `BTCUSDT-PERP`
//! - [`Venue`] - Source venue
//! - [`Record`] - Any of the three record kinds
//! - [`FetchResult`] - One venue's outcome of a fan-out fetch

pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod provider;
pub mod resilience;

pub use errors::{FetchError, RetryClass, ValidationError};

pub use models::{
    FundingRate, Liquidation, OpenInterest, OperationKind, Record, RecordKind, Side, Symbol,
    Venue,
};

pub use orchestrator::{
    FetchOperation, FetchResult, Orchestrator, OrchestratorConfig, RecordValidator, StreamOutcome,
};

pub use provider::{
    BinanceFetcher, BinanceSettings, BybitFetcher, BybitSettings, Fetcher, FetcherCapabilities,
    HyperliquidFetcher, HyperliquidSettings,
};

pub use resilience::{
    CircuitBreakerConfig, CircuitSnapshot, CircuitState, HandlerError, LiquidationHandler,
    ReconnectingStream, RetryExecutor, RetryPolicy,
};
