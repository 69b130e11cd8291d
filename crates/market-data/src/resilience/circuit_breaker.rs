//! Circuit breaker for venue operations.
//!
//! Implements the circuit breaker pattern to stop hammering a venue
//! operation that keeps failing. The circuit has three states:
//!
//! - **Closed**: Normal operation, calls are allowed through.
//! - **Open**: The operation is failing, calls are rejected immediately.
//! - **HalfOpen**: Testing recovery with a bounded number of probe calls.
//!
//! One breaker guards one (venue, operation) pair. Breakers are in-memory
//! and reset when the process restarts.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::FetchError;
use crate::models::{OperationKind, Venue};

/// Default number of consecutive failures before opening the circuit.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default number of consecutive HalfOpen successes needed to close.
const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;

/// Default time to wait after the last failure before probing again.
const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of concurrent probe calls allowed in HalfOpen.
const DEFAULT_HALF_OPEN_MAX_CALLS: u32 = 1;

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - calls are allowed.
    Closed,
    /// Operation is failing - calls are rejected.
    Open,
    /// Testing recovery - limited calls allowed.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Consecutive HalfOpen successes needed to close the circuit.
    pub success_threshold: u32,
    /// Time since the last failure before an Open circuit admits a probe.
    pub timeout: Duration,
    /// Maximum concurrent calls while HalfOpen.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            timeout: DEFAULT_OPEN_TIMEOUT,
            half_open_max_calls: DEFAULT_HALF_OPEN_MAX_CALLS,
        }
    }
}

/// Lifetime counters of a breaker.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub state_changes: u64,
}

/// Point-in-time view of a breaker, for status reporting.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub stats: CircuitStats,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_transition_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    /// Bumped on every transition so stale permits can be recognised.
    generation: u64,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_in_flight: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    last_transition_at: DateTime<Utc>,
    stats: CircuitStats,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            generation: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            half_open_in_flight: 0,
            last_failure: None,
            last_failure_at: None,
            last_success_at: None,
            last_transition_at: Utc::now(),
            stats: CircuitStats::default(),
        }
    }

    fn transition(&mut self, name: &str, to: CircuitState) {
        let from = self.state;
        self.state = to;
        self.generation += 1;
        self.stats.state_changes += 1;
        self.last_transition_at = Utc::now();
        self.consecutive_successes = 0;
        self.half_open_in_flight = 0;
        if to != CircuitState::Open {
            self.consecutive_failures = 0;
        }
        info!("Circuit breaker '{}': {} -> {}", name, from, to);
    }
}

/// Circuit breaker guarding a single venue operation.
///
/// State is kept behind a `std::sync::Mutex` that is only held for
/// bookkeeping, never while the guarded call is running.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    circuit: Mutex<Circuit>,
}

impl CircuitBreaker {
    /// Create a breaker with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    /// Create a breaker with custom configuration.
    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            circuit: Mutex::new(Circuit::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lock the circuit, recovering from poison if necessary.
    ///
    /// The worst case after a poisoned lock is slightly wrong counters,
    /// which is better than panicking inside a fetch path.
    fn lock_circuit(&self) -> MutexGuard<'_, Circuit> {
        self.circuit.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker '{}' mutex was poisoned, recovering", self.name);
            poisoned.into_inner()
        })
    }

    /// Current stored state.
    ///
    /// An Open circuit whose timeout has elapsed still reports `Open`
    /// here; it moves to HalfOpen on the next call.
    pub fn state(&self) -> CircuitState {
        self.lock_circuit().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let circuit = self.lock_circuit();
        CircuitSnapshot {
            name: self.name.clone(),
            state: circuit.state,
            consecutive_failures: circuit.consecutive_failures,
            consecutive_successes: circuit.consecutive_successes,
            stats: circuit.stats.clone(),
            last_failure_at: circuit.last_failure_at,
            last_success_at: circuit.last_success_at,
            last_transition_at: circuit.last_transition_at,
        }
    }

    /// Manually force the circuit back to Closed.
    pub fn reset(&self) {
        let mut circuit = self.lock_circuit();
        if circuit.state != CircuitState::Closed {
            circuit.transition(&self.name, CircuitState::Closed);
        }
        circuit.consecutive_failures = 0;
        circuit.consecutive_successes = 0;
        circuit.last_failure = None;
    }

    /// Run `f` under the breaker.
    ///
    /// Rejected calls fail with [`FetchError::CircuitOpen`] without
    /// invoking `f`. Only retryable errors count as failures; fatal errors
    /// are passed through without touching the counters.
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let permit = self.acquire()?;
        let result = f().await;
        match &result {
            Ok(_) => permit.succeed(),
            Err(e) if e.is_retryable() => permit.fail(),
            Err(_) => permit.release(),
        }
        result
    }

    fn acquire(&self) -> Result<Permit<'_>, FetchError> {
        let mut circuit = self.lock_circuit();
        circuit.stats.total_calls += 1;

        if circuit.state == CircuitState::Open {
            let elapsed = circuit
                .last_failure
                .map(|at| at.elapsed() >= self.config.timeout)
                .unwrap_or(true);
            if !elapsed {
                circuit.stats.rejected_calls += 1;
                debug!("Circuit breaker '{}': rejecting call while open", self.name);
                return Err(self.open_error());
            }
            circuit.transition(&self.name, CircuitState::HalfOpen);
        }

        let half_open = circuit.state == CircuitState::HalfOpen;
        if half_open {
            if circuit.half_open_in_flight >= self.config.half_open_max_calls {
                circuit.stats.rejected_calls += 1;
                debug!(
                    "Circuit breaker '{}': half-open probe limit ({}) reached",
                    self.name, self.config.half_open_max_calls
                );
                return Err(self.open_error());
            }
            circuit.half_open_in_flight += 1;
        }

        Ok(Permit {
            breaker: self,
            generation: circuit.generation,
            half_open,
            settled: false,
        })
    }

    fn open_error(&self) -> FetchError {
        FetchError::CircuitOpen {
            name: self.name.clone(),
        }
    }

    fn on_success(&self, generation: u64, half_open: bool) {
        let mut circuit = self.lock_circuit();
        circuit.stats.successful_calls += 1;
        circuit.last_success_at = Some(Utc::now());
        if circuit.generation != generation {
            return;
        }
        if half_open {
            circuit.half_open_in_flight = circuit.half_open_in_flight.saturating_sub(1);
        }

        match circuit.state {
            CircuitState::Closed => {
                circuit.consecutive_failures = 0;
                circuit.consecutive_successes += 1;
            }
            CircuitState::HalfOpen => {
                circuit.consecutive_successes += 1;
                debug!(
                    "Circuit breaker '{}': half-open success ({}/{})",
                    self.name, circuit.consecutive_successes, self.config.success_threshold
                );
                if circuit.consecutive_successes >= self.config.success_threshold {
                    circuit.last_failure = None;
                    circuit.transition(&self.name, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, generation: u64, half_open: bool) {
        let mut circuit = self.lock_circuit();
        circuit.stats.failed_calls += 1;
        circuit.last_failure_at = Some(Utc::now());
        if circuit.generation != generation {
            return;
        }
        if half_open {
            circuit.half_open_in_flight = circuit.half_open_in_flight.saturating_sub(1);
        }
        circuit.last_failure = Some(Instant::now());
        circuit.consecutive_successes = 0;
        circuit.consecutive_failures += 1;

        match circuit.state {
            CircuitState::Closed => {
                if circuit.consecutive_failures >= self.config.failure_threshold {
                    circuit.transition(&self.name, CircuitState::Open);
                } else {
                    debug!(
                        "Circuit breaker '{}': failure ({}/{})",
                        self.name, circuit.consecutive_failures, self.config.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                circuit.transition(&self.name, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn on_release(&self, generation: u64, half_open: bool) {
        if !half_open {
            return;
        }
        let mut circuit = self.lock_circuit();
        if circuit.generation == generation {
            circuit.half_open_in_flight = circuit.half_open_in_flight.saturating_sub(1);
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Admission granted by [`CircuitBreaker::acquire`].
///
/// Dropping an unsettled permit (for instance when the guarded future is
/// cancelled) releases its HalfOpen slot without recording an outcome.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    half_open: bool,
    settled: bool,
}

impl Permit<'_> {
    fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.generation, self.half_open);
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.generation, self.half_open);
    }

    fn release(mut self) {
        self.settled = true;
        self.breaker.on_release(self.generation, self.half_open);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_release(self.generation, self.half_open);
        }
    }
}

/// Key of a breaker in the registry.
pub type CircuitKey = (Venue, OperationKind);

/// Lazily-populated set of breakers, one per (venue, operation).
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<CircuitKey, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    fn lock_breakers(&self) -> MutexGuard<'_, HashMap<CircuitKey, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker registry mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Breaker for `(venue, operation)`, created on first use.
    pub fn get(&self, venue: Venue, operation: OperationKind) -> Arc<CircuitBreaker> {
        self.lock_breakers()
            .entry((venue, operation))
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_config(
                    format!("{}:{}", venue, operation),
                    self.config.clone(),
                ))
            })
            .clone()
    }

    /// Snapshots of every breaker created so far, sorted by name.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<CircuitSnapshot> =
            self.lock_breakers().values().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Reset one breaker. Returns false if it was never created.
    pub fn reset(&self, venue: Venue, operation: OperationKind) -> bool {
        let breaker = self.lock_breakers().get(&(venue, operation)).cloned();
        match breaker {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> = self.lock_breakers().values().cloned().collect();
        for breaker in breakers {
            breaker.reset();
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
