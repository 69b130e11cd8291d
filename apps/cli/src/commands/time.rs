//! Command-line timestamps.

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};

/// Parse `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS` or RFC 3339 as UTC.
///
/// A bare date is the start of that day, or its last millisecond when
/// `end_of_day` is set.
pub fn parse_time(raw: &str, end_of_day: bool) -> anyhow::Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let start = date.and_time(NaiveTime::MIN).and_utc();
        return Ok(if end_of_day {
            start + TimeDelta::days(1) - TimeDelta::milliseconds(1)
        } else {
            start
        });
    }
    Err(anyhow!(
        "invalid time '{}': expected YYYY-MM-DD, YYYY-MM-DDTHH:MM:SS or RFC 3339",
        raw
    ))
}

/// Resolve optional `--from`/`--to` flags; `--to` defaults to now.
pub fn parse_range(
    from: Option<&str>,
    to: Option<&str>,
) -> anyhow::Result<(Option<DateTime<Utc>>, DateTime<Utc>)> {
    let start = from.map(|raw| parse_time(raw, false)).transpose()?;
    let end = match to {
        Some(raw) => parse_time(raw, true)?.min(Utc::now()),
        None => Utc::now(),
    };
    if let Some(start) = start {
        if start > end {
            return Err(anyhow!("--from {} is after --to {}", start, end));
        }
    }
    Ok((start, end))
}
