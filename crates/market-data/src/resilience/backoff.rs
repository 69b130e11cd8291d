//! Exponential backoff and the retry executor.

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use log::{error, warn};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::errors::{FetchError, RetryClass};

/// Smallest delay ever slept between attempts.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Minimum delay after a rate-limit response.
pub const RATE_LIMIT_MIN_DELAY: Duration = Duration::from_secs(5);

/// Maximum relative jitter applied to a computed delay.
const JITTER_FACTOR: f64 = 0.25;

/// Retry/backoff configuration.
///
/// `delay(attempt) = min(base_delay * multiplier^attempt, max_delay)`,
/// optionally perturbed by up to ±25% and never below [`MIN_RETRY_DELAY`].
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy used for reconnecting live streams: 1s, 2s, 4s, 8s, 16s.
    pub fn stream_default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Same policy without jitter.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Unjittered exponential delay for a zero-based attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.max(0.0).powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped).max(MIN_RETRY_DELAY)
        } else {
            MIN_RETRY_DELAY
        }
    }

    /// Delay to sleep before retrying a zero-based attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if !self.jitter {
            return delay;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-JITTER_FACTOR..=JITTER_FACTOR);
        Duration::from_secs_f64(delay.as_secs_f64() * factor).max(MIN_RETRY_DELAY)
    }

    /// Delay for a retry caused by `error`; rate limits wait at least
    /// [`RATE_LIMIT_MIN_DELAY`] or the venue's hint, whichever is longer.
    pub fn delay_for(&self, attempt: u32, error: &FetchError) -> Duration {
        let delay = self.delay(attempt);
        match error {
            FetchError::RateLimited { retry_after, .. } => {
                let floor = retry_after
                    .map(|hint| hint.max(RATE_LIMIT_MIN_DELAY))
                    .unwrap_or(RATE_LIMIT_MIN_DELAY);
                delay.max(floor)
            }
            _ => delay,
        }
    }
}

/// Boxed reconnect hook invoked before retrying connection-level errors.
pub type ReconnectHook<'a> =
    Box<dyn Fn() -> BoxFuture<'a, Result<(), FetchError>> + Send + Sync + 'a>;

/// Runs an async operation under a [`RetryPolicy`].
///
/// ```ignore
/// let value = RetryExecutor::new(&policy, "BINANCE open_interest")
///     .with_cancellation(token.clone())
///     .execute(|| fetcher.fetch_open_interest(&symbol))
///     .await?;
/// ```
pub struct RetryExecutor<'a> {
    policy: &'a RetryPolicy,
    operation: String,
    cancel: Option<CancellationToken>,
    on_reconnect: Option<ReconnectHook<'a>>,
}

impl<'a> RetryExecutor<'a> {
    pub fn new(policy: &'a RetryPolicy, operation: impl Into<String>) -> Self {
        Self {
            policy,
            operation: operation.into(),
            cancel: None,
            on_reconnect: None,
        }
    }

    /// Abort attempts and backoff sleeps as soon as `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Hook run before retrying an error that [needs a reconnect](FetchError::needs_reconnect).
    /// A failing hook is logged and does not stop the retry loop.
    pub fn on_reconnect<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> BoxFuture<'a, Result<(), FetchError>> + Send + Sync + 'a,
    {
        self.on_reconnect = Some(Box::new(hook));
        self
    }

    /// Invoke `f` until it succeeds, fails fatally, or the retry budget is spent.
    pub async fn execute<T, F, Fut>(&self, mut f: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if self.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let error = match self.guard(f()).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_retryable() {
                if error.retry_class() == RetryClass::Never {
                    error!("{} failed with non-retryable error: {}", self.operation, error);
                }
                return Err(error);
            }
            if attempt >= self.policy.max_retries {
                error!(
                    "{} failed after {} attempts: {}",
                    self.operation,
                    attempt + 1,
                    error
                );
                return Err(error);
            }

            if error.needs_reconnect() {
                if let Some(hook) = &self.on_reconnect {
                    match self.guard(hook()).await {
                        Ok(()) => {}
                        Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                        Err(e) => warn!("{}: reconnect failed: {}", self.operation, e),
                    }
                }
            }

            let delay = self.policy.delay_for(attempt, &error);
            warn!(
                "{} failed (attempt {}/{}): {}. Retrying in {:.2}s",
                self.operation,
                attempt + 1,
                self.policy.max_retries + 1,
                error,
                delay.as_secs_f64()
            );
            self.sleep(delay).await?;
            attempt += 1;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|token| token.is_cancelled())
            .unwrap_or(false)
    }

    async fn guard<T, Fut>(&self, fut: Fut) -> Result<T, FetchError>
    where
        Fut: Future<Output = Result<T, FetchError>>,
    {
        match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(FetchError::Cancelled),
                result = fut => result,
            },
            None => fut.await,
        }
    }

    async fn sleep(&self, delay: Duration) -> Result<(), FetchError> {
        self.guard(async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await
    }
}
