//! Resilience primitives for venue calls.
//!
//! - [`CircuitBreaker`] / [`CircuitBreakerRegistry`] - per (venue, operation) fail-fast guards
//! - [`RetryPolicy`] / [`RetryExecutor`] - exponential backoff with cancellation
//! - [`ReconnectingStream`] - long-lived batch consumption with reconnects
//! - [`invoke_guarded`] - error and panic boundary for event handlers

mod backoff;
mod callback;
mod circuit_breaker;
mod reconnect;

pub use backoff::{
    ReconnectHook, RetryExecutor, RetryPolicy, MIN_RETRY_DELAY, RATE_LIMIT_MIN_DELAY,
};
pub use callback::{invoke_guarded, EventHandler, HandlerError, LiquidationHandler};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitKey, CircuitSnapshot,
    CircuitState, CircuitStats,
};
pub use reconnect::ReconnectingStream;
