//! Venue fetcher trait definition.
//!
//! This module defines the `Fetcher` trait that every venue adapter
//! implements. The orchestrator treats adapters as opaque; all
//! venue-specific normalization lives behind this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::errors::FetchError;
use crate::models::{FundingRate, Liquidation, OpenInterest, Symbol, Venue};
use crate::resilience::{invoke_guarded, LiquidationHandler, ReconnectingStream, RetryPolicy};

use super::capabilities::FetcherCapabilities;

/// Trait for venue adapters.
///
/// Snapshot methods fail with a retryable [`FetchError`] on network
/// trouble and with a fatal one on bad credentials or unknown symbols.
/// History methods return a lazy, finite, ascending stream that stops once
/// the venue's pages pass `end`. A history stream is not restartable;
/// retrying means asking for a new one.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use perpflow_market_data::provider::{Fetcher, FetcherCapabilities};
///
/// struct MyVenue;
///
/// #[async_trait]
/// impl Fetcher for MyVenue {
///     fn venue(&self) -> Venue {
///         Venue::Binance
///     }
///
///     fn capabilities(&self) -> FetcherCapabilities {
///         FetcherCapabilities::default()
///     }
///
///     // ... implement snapshot methods
/// }
/// ```
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Venue this fetcher talks to.
    fn venue(&self) -> Venue;

    /// Operations this fetcher implements.
    fn capabilities(&self) -> FetcherCapabilities;

    /// Prepare the adapter for use. Must be idempotent.
    async fn connect(&self) -> Result<(), FetchError> {
        Ok(())
    }

    /// Release connections held by the adapter. Must be idempotent.
    async fn close(&self) -> Result<(), FetchError> {
        Ok(())
    }

    /// Current open interest for `symbol`.
    async fn fetch_open_interest(&self, symbol: &Symbol) -> Result<OpenInterest, FetchError>;

    /// Current funding rate for `symbol`.
    async fn fetch_funding_rate(&self, symbol: &Symbol) -> Result<FundingRate, FetchError>;

    /// Open-interest history in `[start, end]`, ascending.
    fn fetch_open_interest_history<'a>(
        &'a self,
        symbol: &'a Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxStream<'a, Result<OpenInterest, FetchError>> {
        let _ = (symbol, start, end);
        not_supported(self.venue(), "open interest history")
    }

    /// Funding-rate history in `[start, end]`, ascending.
    fn fetch_funding_rate_history<'a>(
        &'a self,
        symbol: &'a Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxStream<'a, Result<FundingRate, FetchError>> {
        let _ = (symbol, start, end);
        not_supported(self.venue(), "funding rate history")
    }

    /// Wait for the next non-empty batch of liquidations.
    ///
    /// Implementations keep a live connection between calls and
    /// re-establish it lazily after a failure.
    async fn watch_liquidations(&self, symbol: &Symbol) -> Result<Vec<Liquidation>, FetchError> {
        let _ = symbol;
        Err(FetchError::NotSupported(format!(
            "liquidation stream on {}",
            self.venue()
        )))
    }

    /// Stream liquidations for `symbol` into `handler` until cancelled.
    ///
    /// Wraps [`watch_liquidations`](Self::watch_liquidations) in a
    /// [`ReconnectingStream`]. Handler failures are logged and never end
    /// the stream.
    async fn stream_liquidations(
        &self,
        symbol: &Symbol,
        handler: LiquidationHandler,
        backoff: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        let name = format!("{}:{} liquidations", self.venue(), symbol);
        let mut stream = ReconnectingStream::new(name.clone(), backoff.clone());
        stream
            .run(
                || self.watch_liquidations(symbol),
                |batch| {
                    for liquidation in batch {
                        invoke_guarded(&name, &handler, liquidation);
                    }
                },
                cancel,
            )
            .await
    }
}

fn not_supported<'a, T: Send + 'a>(
    venue: Venue,
    operation: &str,
) -> BoxStream<'a, Result<T, FetchError>> {
    let error = FetchError::NotSupported(format!("{} on {}", operation, venue));
    stream::once(async move { Err(error) }).boxed()
}
