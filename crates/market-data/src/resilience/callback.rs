//! Guarded invocation of caller-supplied event handlers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use log::error;

use crate::models::Liquidation;

/// Error returned by an event handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Shared event handler.
pub type EventHandler<T> = Arc<dyn Fn(T) -> Result<(), HandlerError> + Send + Sync>;

/// Handler receiving liquidation events from a stream.
pub type LiquidationHandler = EventHandler<Liquidation>;

/// Invoke `handler` so that neither an error nor a panic escapes.
///
/// Returns `true` when the handler completed successfully. Failures are
/// logged under `context` and otherwise swallowed.
pub fn invoke_guarded<T>(context: &str, handler: &EventHandler<T>, event: T) -> bool {
    match catch_unwind(AssertUnwindSafe(|| handler(event))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!("{}: event handler failed: {}", context, e);
            false
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("{}: event handler panicked: {}", context, message);
            false
        }
    }
}
