//! Small helpers shared by the REST adapters.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use log::warn;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;

use crate::errors::FetchError;
use crate::models::Venue;

/// Default HTTP request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest body excerpt carried into an error message.
const MAX_ERROR_BODY: usize = 256;

pub fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Send `request` and decode a JSON body, classifying HTTP failures.
pub async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, FetchError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        return Err(FetchError::from_status(
            status.as_u16(),
            excerpt(&body),
            retry_after,
        ));
    }
    let body = response.text().await?;
    serde_json::from_str(&body)
        .map_err(|e| FetchError::InvalidResponse(format!("{}: {}", e, excerpt(&body))))
}

pub fn excerpt(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Parse a decimal carried as a JSON string.
pub fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, FetchError> {
    let raw = raw.trim();
    raw.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|_| FetchError::InvalidResponse(format!("{} is not a number: '{}'", field, raw)))
}

/// Convert epoch milliseconds to a UTC timestamp.
pub fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>, FetchError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| FetchError::InvalidResponse(format!("invalid timestamp: {}", ms)))
}

/// Parse epoch milliseconds carried as a JSON string.
pub fn parse_millis(field: &str, raw: &str) -> Result<DateTime<Utc>, FetchError> {
    let ms = raw.trim().parse::<i64>().map_err(|_| {
        FetchError::InvalidResponse(format!("{} is not a timestamp: '{}'", field, raw))
    })?;
    millis_to_utc(ms)
}

/// Collect normalized entries, dropping those that fail record validation.
///
/// Decoding and transport errors still fail the whole batch.
pub fn keep_valid<T>(
    venue: Venue,
    what: &str,
    entries: impl IntoIterator<Item = Result<T, FetchError>>,
) -> Result<Vec<T>, FetchError> {
    let mut kept = Vec::new();
    for entry in entries {
        match entry {
            Ok(record) => kept.push(record),
            Err(FetchError::Validation(e)) => {
                warn!("Dropping invalid {} from {}: {}", what, venue, e)
            }
            Err(e) => return Err(e),
        }
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ValidationError;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_plain_and_scientific_decimals() {
        assert_eq!(parse_decimal("rate", "0.00010000").unwrap(), dec!(0.0001));
        assert_eq!(parse_decimal("rate", "-1.25e-5").unwrap(), dec!(-0.0000125));
        assert!(parse_decimal("rate", "n/a").is_err());
    }

    #[test]
    fn parses_millis() {
        let ts = parse_millis("time", "1700000000123").unwrap();
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_123);
        assert!(parse_millis("time", "soon").is_err());
    }

    #[test]
    fn keep_valid_drops_only_validation_failures() {
        let entries = vec![
            Ok(1),
            Err(FetchError::Validation(ValidationError::NonPositive {
                field: "quantity",
                value: dec!(0),
            })),
            Ok(3),
        ];
        assert_eq!(keep_valid(Venue::Bybit, "entry", entries).unwrap(), vec![1, 3]);

        let broken = vec![Ok(1), Err(FetchError::InvalidResponse("bad".to_string()))];
        assert!(matches!(
            keep_valid(Venue::Bybit, "entry", broken),
            Err(FetchError::InvalidResponse(_))
        ));
    }

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        let short = excerpt(&long);
        assert!(short.ends_with("..."));
        assert!(short.len() <= MAX_ERROR_BODY + 3);
    }
}
