/// Classification for retry policy.
///
/// Used by the retry executor, the circuit breaker and the reconnecting
/// stream to decide how to react to a failed venue call.
///
/// # Behavior Summary
///
/// | Class | Retried? | Counts as breaker failure? | Reconnect first? |
/// |-------|----------|----------------------------|------------------|
/// | `Never` | No | No | No |
/// | `WithBackoff` | Yes | Yes | No |
/// | `Reconnect` | Yes | Yes | Yes |
/// | `RateLimited` | Yes, with a minimum delay | Yes | No |
/// | `CircuitOpen` | No | No (already open) | No |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Fatal - bad credentials, malformed request, unsupported operation.
    /// The request is fundamentally invalid and retrying won't help.
    Never,

    /// Transient - timeout or venue temporarily unavailable.
    WithBackoff,

    /// Transient at the connection level. The caller should re-establish
    /// the venue connection before trying again.
    Reconnect,

    /// The venue throttled us. Retry, but never sooner than the
    /// rate-limit floor.
    RateLimited,

    /// Circuit breaker is open for this venue operation.
    /// Fail fast until the circuit moves to half-open.
    CircuitOpen,
}

impl RetryClass {
    /// Whether an error of this class may consume a retry attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WithBackoff | Self::Reconnect | Self::RateLimited)
    }
}
