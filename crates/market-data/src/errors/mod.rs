//! Error types and retry classification for the market data crate.
//!
//! This module provides:
//! - [`FetchError`]: The error enum for every venue operation
//! - [`ValidationError`]: Record and identifier invariant violations
//! - [`RetryClass`]: Classification for determining retry behavior

mod retry;

pub use retry::RetryClass;

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::Venue;

/// A value failed the invariants of the record model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Symbol must not be empty")]
    EmptySymbol,

    #[error("Invalid symbol '{0}': only letters, digits, '-' and '_' are allowed")]
    InvalidSymbol(String),

    #[error("Unknown venue: {0}")]
    UnknownVenue(String),

    #[error("Unknown record kind: {0}")]
    UnknownRecordKind(String),

    #[error("Unknown liquidation side: {0}")]
    UnknownSide(String),

    #[error("Timestamp {timestamp} is in the future")]
    FutureTimestamp { timestamp: DateTime<Utc> },

    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: Decimal },

    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: Decimal },

    #[error("{field} is out of range")]
    Overflow { field: &'static str },

    #[error("Record does not match request: {0}")]
    Mismatch(String),
}

/// Errors that can occur while talking to a venue.
///
/// Each variant is classified into a [`RetryClass`] via
/// [`retry_class`](Self::retry_class), which drives retry, reconnection and
/// circuit-breaker accounting.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// The request or read did not complete in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Transport failure (DNS, TCP, TLS).
    #[error("Network error: {0}")]
    Network(String),

    /// The venue throttled the request (HTTP 418/429).
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        /// Hint from the venue, when it sent one.
        retry_after: Option<Duration>,
    },

    /// The venue answered with a server-side failure (HTTP 5xx).
    #[error("Venue unavailable: {0}")]
    Unavailable(String),

    /// A live connection was dropped by the peer.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The operation needs a live connection and there is none.
    #[error("Not connected")]
    NotConnected,

    /// Credentials were missing or rejected (HTTP 401/403).
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The venue rejected the request as malformed (HTTP 400/404).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The venue does not list the requested instrument.
    #[error("Unsupported symbol: {0}")]
    UnsupportedSymbol(String),

    /// The venue adapter does not implement the operation.
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// The venue response could not be decoded.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A caller asked for a venue that has no configured fetcher.
    #[error("Venue not configured: {0}")]
    VenueNotConfigured(Venue),

    /// The circuit breaker for this venue operation is open.
    #[error("Circuit open: {name}")]
    CircuitOpen { name: String },

    /// A reconnecting stream gave up after its retry budget was spent.
    #[error("Stream failed after {attempts} reconnect attempts: {last_error}")]
    StreamExhausted { attempts: u32, last_error: String },

    /// The operation was cancelled by its caller.
    #[error("Cancelled")]
    Cancelled,

    /// The venue returned a value that violates the record model.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
}

impl FetchError {
    /// Returns the retry classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use perpflow_market_data::errors::{FetchError, RetryClass};
    ///
    /// let error = FetchError::Timeout("openInterest".to_string());
    /// assert_eq!(error.retry_class(), RetryClass::WithBackoff);
    ///
    /// let error = FetchError::Authentication("bad key".to_string());
    /// assert_eq!(error.retry_class(), RetryClass::Never);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Timeout(_) | Self::Unavailable(_) => RetryClass::WithBackoff,

            Self::Network(_) | Self::ConnectionClosed(_) | Self::NotConnected => {
                RetryClass::Reconnect
            }

            Self::RateLimited { .. } => RetryClass::RateLimited,

            Self::CircuitOpen { .. } => RetryClass::CircuitOpen,

            Self::Authentication(_)
            | Self::BadRequest(_)
            | Self::UnsupportedSymbol(_)
            | Self::NotSupported(_)
            | Self::InvalidResponse(_)
            | Self::VenueNotConfigured(_)
            | Self::StreamExhausted { .. }
            | Self::Cancelled
            | Self::Validation(_) => RetryClass::Never,
        }
    }

    /// Transient errors are retried and count against circuit breakers.
    pub fn is_retryable(&self) -> bool {
        self.retry_class().is_retryable()
    }

    /// Connection-level errors call for a reconnect before the next attempt.
    pub fn needs_reconnect(&self) -> bool {
        self.retry_class() == RetryClass::Reconnect
    }

    /// Map an HTTP error status from a venue to a classified error.
    pub fn from_status(
        status: u16,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        let message = format!("HTTP {}: {}", status, message.into());
        match status {
            401 | 403 => Self::Authentication(message),
            418 | 429 => Self::RateLimited {
                message,
                retry_after,
            },
            400..=499 => Self::BadRequest(message),
            _ => Self::Unavailable(message),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout(e.to_string());
        }
        if e.is_decode() {
            return Self::InvalidResponse(e.to_string());
        }
        if let Some(status) = e.status() {
            return Self::from_status(status.as_u16(), e.to_string(), None);
        }
        Self::Network(e.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FetchError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::Url(url) => Self::BadRequest(url.to_string()),
            other => Self::ConnectionClosed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(FetchError::Timeout("t".into()).is_retryable());
        assert!(FetchError::Unavailable("503".into()).is_retryable());
        assert!(FetchError::Network("reset".into()).is_retryable());
        assert!(FetchError::RateLimited {
            message: "429".into(),
            retry_after: None
        }
        .is_retryable());
    }

    #[test]
    fn fatal_errors_are_not_retryable() {
        assert!(!FetchError::Authentication("key".into()).is_retryable());
        assert!(!FetchError::BadRequest("symbol".into()).is_retryable());
        assert!(!FetchError::NotSupported("history".into()).is_retryable());
        assert!(!FetchError::Validation(ValidationError::EmptySymbol).is_retryable());
        assert!(!FetchError::CircuitOpen { name: "x".into() }.is_retryable());
        assert!(!FetchError::Cancelled.is_retryable());
    }

    #[test]
    fn connection_errors_need_reconnect() {
        assert!(FetchError::ConnectionClosed("eof".into()).needs_reconnect());
        assert!(FetchError::NotConnected.needs_reconnect());
        assert!(!FetchError::Timeout("t".into()).needs_reconnect());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            FetchError::from_status(401, "", None),
            FetchError::Authentication(_)
        ));
        assert!(matches!(
            FetchError::from_status(429, "", Some(Duration::from_secs(7))),
            FetchError::RateLimited {
                retry_after: Some(d),
                ..
            } if d == Duration::from_secs(7)
        ));
        assert!(matches!(
            FetchError::from_status(418, "", None),
            FetchError::RateLimited { .. }
        ));
        assert!(matches!(
            FetchError::from_status(400, "bad symbol", None),
            FetchError::BadRequest(_)
        ));
        assert!(matches!(
            FetchError::from_status(502, "", None),
            FetchError::Unavailable(_)
        ));
    }
}
