//! Cursor-based pagination over time-ordered venue endpoints.

use std::collections::VecDeque;
use std::future::Future;

use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use log::debug;

use crate::errors::FetchError;

struct PageCursor<F, T> {
    since: DateTime<Utc>,
    end: DateTime<Utc>,
    fetch_page: F,
    timestamp_of: fn(&T) -> DateTime<Utc>,
    buffer: VecDeque<T>,
    exhausted: bool,
}

/// Turn a page function into a lazy ascending stream over `[start, end]`.
///
/// `fetch_page(since)` returns the next page of items at or after `since`,
/// in any order. The stream ends at the first item past `end`, on an empty
/// page, when a page fails to move the cursor forward, or after the first
/// error (which is yielded). The cursor advances to the last timestamp of
/// a page plus one millisecond.
pub fn paginate<'a, T, F, Fut>(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    fetch_page: F,
    timestamp_of: fn(&T) -> DateTime<Utc>,
) -> BoxStream<'a, Result<T, FetchError>>
where
    T: Send + 'a,
    F: FnMut(DateTime<Utc>) -> Fut + Send + 'a,
    Fut: Future<Output = Result<Vec<T>, FetchError>> + Send + 'a,
{
    let cursor = PageCursor {
        since: start,
        end,
        fetch_page,
        timestamp_of,
        buffer: VecDeque::new(),
        exhausted: start > end,
    };

    stream::unfold(cursor, |mut cursor| async move {
        loop {
            if let Some(item) = cursor.buffer.pop_front() {
                if (cursor.timestamp_of)(&item) > cursor.end {
                    return None;
                }
                return Some((Ok(item), cursor));
            }
            if cursor.exhausted {
                return None;
            }

            let page = match (cursor.fetch_page)(cursor.since).await {
                Ok(page) => page,
                Err(e) => {
                    cursor.exhausted = true;
                    return Some((Err(e), cursor));
                }
            };

            let since = cursor.since;
            let timestamp_of = cursor.timestamp_of;
            let mut items: Vec<T> = page
                .into_iter()
                .filter(|item| timestamp_of(item) >= since)
                .collect();
            items.sort_by_key(|item| timestamp_of(item));

            let Some(last) = items.last().map(timestamp_of) else {
                debug!("Pagination finished: no new items since {}", since);
                return None;
            };

            cursor.since = last + TimeDelta::milliseconds(1);
            if last >= cursor.end {
                cursor.exhausted = true;
            }
            cursor.buffer.extend(items);
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn ts(v: &i64) -> DateTime<Utc> {
        at(*v)
    }

    /// Serves items from a fixed dataset, `page_size` at a time.
    fn pager(
        data: Vec<i64>,
        page_size: usize,
        requests: Arc<Mutex<Vec<i64>>>,
    ) -> impl FnMut(DateTime<Utc>) -> futures::future::Ready<Result<Vec<i64>, FetchError>> {
        move |since| {
            requests.lock().unwrap().push(since.timestamp_millis());
            let page: Vec<i64> = data
                .iter()
                .copied()
                .filter(|v| *v >= since.timestamp_millis())
                .take(page_size)
                .collect();
            futures::future::ready(Ok(page))
        }
    }

    #[tokio::test]
    async fn walks_pages_until_end() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let data = vec![100, 200, 300, 400, 500, 600];
        let items: Vec<i64> = paginate(at(100), at(450), pager(data, 2, requests.clone()), ts)
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(items, vec![100, 200, 300, 400]);
        assert_eq!(*requests.lock().unwrap(), vec![100, 201, 401]);
    }

    #[tokio::test]
    async fn stops_on_empty_page() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let pages = pager(vec![1, 2, 3], 2, requests.clone());
        let items: Vec<i64> = paginate(at(0), at(10_000), pages, ts)
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn stops_when_venue_repeats_a_page() {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let items: Vec<i64> = paginate(
            at(0),
            at(10_000),
            move |_since| {
                *counter.lock().unwrap() += 1;
                futures::future::ready(Ok(vec![5, 6]))
            },
            ts,
        )
        .map(|r| r.unwrap())
        .collect()
        .await;

        assert_eq!(items, vec![5, 6]);
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn sorts_descending_pages() {
        let mut served = false;
        let items: Vec<i64> = paginate(
            at(0),
            at(100),
            move |_since| {
                let page = if served { vec![] } else { vec![30, 20, 10] };
                served = true;
                futures::future::ready(Ok(page))
            },
            ts,
        )
        .map(|r| r.unwrap())
        .collect()
        .await;

        assert_eq!(items, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn error_is_yielded_then_stream_ends() {
        let results: Vec<Result<i64, FetchError>> = paginate(
            at(0),
            at(100),
            |_since| futures::future::ready(Err(FetchError::Timeout("page".into()))),
            ts,
        )
        .collect()
        .await;

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(FetchError::Timeout(_))));
    }
}
