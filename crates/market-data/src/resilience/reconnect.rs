//! Reconnecting consumption of a live "fetch next batch" source.

use std::future::Future;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use super::backoff::RetryPolicy;
use crate::errors::{FetchError, RetryClass};

/// Drives a long-lived stream session.
///
/// Every successful batch is handed to the processing callback and resets
/// the retry counter. Failures back off exponentially; once `max_retries`
/// consecutive failures have been retried the stream gives up with
/// [`FetchError::StreamExhausted`]. A batch rejected by record validation is
/// logged and skipped without counting as a failure. Cancellation ends the
/// loop with `Ok(())` immediately, including while sleeping between attempts.
pub struct ReconnectingStream {
    name: String,
    policy: RetryPolicy,
    retry_count: u32,
}

impl ReconnectingStream {
    pub fn new(name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            retry_count: 0,
        }
    }

    /// Consecutive failures since the last successful batch.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub async fn run<T, F, Fut, P>(
        &mut self,
        mut fetch_next: F,
        mut process: P,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
        P: FnMut(T),
    {
        info!("Stream '{}' started", self.name);
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = fetch_next() => result,
            };

            let error = match result {
                Ok(batch) => {
                    process(batch);
                    if self.retry_count > 0 {
                        debug!(
                            "Stream '{}' recovered after {} retries",
                            self.name, self.retry_count
                        );
                    }
                    self.retry_count = 0;
                    continue;
                }
                Err(FetchError::Cancelled) => break,
                Err(FetchError::Validation(e)) => {
                    warn!("Stream '{}' skipped an invalid batch: {}", self.name, e);
                    continue;
                }
                Err(e) => e,
            };

            if error.retry_class() == RetryClass::Never {
                warn!("Stream '{}' stopped by fatal error: {}", self.name, error);
                return Err(error);
            }
            if self.retry_count >= self.policy.max_retries {
                warn!(
                    "Stream '{}' giving up after {} retries: {}",
                    self.name, self.retry_count, error
                );
                return Err(FetchError::StreamExhausted {
                    attempts: self.retry_count,
                    last_error: error.to_string(),
                });
            }

            let delay = self.policy.delay_for(self.retry_count, &error);
            self.retry_count += 1;
            warn!(
                "Stream '{}' error: {}. Reconnecting in {:.2}s ({}/{})",
                self.name,
                error,
                delay.as_secs_f64(),
                self.retry_count,
                self.policy.max_retries
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("Stream '{}' stopped", self.name);
        Ok(())
    }
}
