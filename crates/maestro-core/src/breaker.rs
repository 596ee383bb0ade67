//! Circuit breaker guarding calls to one remote platform adapter.
//!
//! Three states: `Closed` (normal), `Open` (fast-fail until the recovery
//! timeout elapses), `HalfOpen` (a single trial call decides whether to
//! close again or reopen). Only errors matching the configured trip
//! predicate count toward the failure threshold; business-level rejections
//! pass through without affecting the breaker.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::adapter::AdapterError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Consecutive qualifying failures before the breaker opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// How long an open breaker waits before permitting a trial call.
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Predicate deciding whether an error counts toward the failure threshold.
pub type TripPredicate = Arc<dyn Fn(&AdapterError) -> bool + Send + Sync>;

/// Circuit breaker tuning knobs.
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    /// Which errors trip the breaker. Defaults to transient
    /// (transport/timeout) errors only.
    pub trip_predicate: TripPredicate,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            trip_predicate: Arc::new(AdapterError::is_transient),
        }
    }
}

impl std::fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery_timeout", &self.recovery_timeout)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Read-only snapshot of the breaker's bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct CircuitStats {
    pub state: CircuitState,
    /// Consecutive qualifying failures.
    pub failure_count: u32,
    /// Total successful calls over the breaker's lifetime.
    pub success_count: u64,
    pub last_failure_at: Option<Instant>,
    pub next_attempt_at: Option<Instant>,
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    last_failure_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
    /// Whether the single half-open trial call is currently in flight.
    trial_in_flight: bool,
}

// ---------------------------------------------------------------------------
// CircuitError
// ---------------------------------------------------------------------------

/// Result of a call made through the breaker.
#[derive(Debug, Error)]
pub enum CircuitError {
    /// The breaker is open; the wrapped operation was not invoked.
    #[error("circuit open, next attempt permitted in {retry_in:?}")]
    Open { retry_in: Duration },

    /// The wrapped operation ran and failed.
    #[error(transparent)]
    Inner(#[from] AdapterError),
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

/// Per-adapter failure tracker with fast-fail and half-open recovery.
///
/// Safe under concurrent `execute` calls: state transitions happen under a
/// mutex while the wrapped operation itself is awaited outside it.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
                next_attempt_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Run `op` through the breaker.
    ///
    /// Open + timeout not yet elapsed fails immediately with
    /// [`CircuitError::Open`] carrying the time until the next permitted
    /// attempt. Open + timeout elapsed transitions to half-open, where
    /// exactly one trial call is admitted; its outcome decides closed vs.
    /// reopened. Errors rejected by the trip predicate pass through without
    /// touching the failure counter.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, CircuitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        self.acquire()?;

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if (self.config.trip_predicate)(&err) {
                    self.record_failure();
                } else {
                    self.release_trial();
                }
                Err(CircuitError::Inner(err))
            }
        }
    }

    /// Current bookkeeping snapshot.
    pub fn stats(&self) -> CircuitStats {
        let inner = self.lock();
        CircuitStats {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_at: inner.last_failure_at,
            next_attempt_at: inner.next_attempt_at,
        }
    }

    /// Force the breaker open (operational escape hatch).
    pub fn force_open(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Open;
        inner.next_attempt_at = Some(Instant::now() + self.config.recovery_timeout);
        inner.trial_in_flight = false;
        tracing::warn!("circuit breaker forced open");
    }

    /// Force the breaker closed, clearing the failure counter.
    pub fn force_closed(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.next_attempt_at = None;
        inner.trial_in_flight = false;
        tracing::warn!("circuit breaker forced closed");
    }

    /// Reset all counters and return to the closed state.
    pub fn reset(&self) {
        let mut inner = self.lock();
        *inner = BreakerInner {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            next_attempt_at: None,
            trial_in_flight: false,
        };
    }

    // -- internals --

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // Recover the guard even if a holder panicked; the bookkeeping
        // fields are each valid on their own.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gate an incoming call, transitioning open -> half-open when due.
    fn acquire(&self) -> Result<(), CircuitError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let now = Instant::now();
                match inner.next_attempt_at {
                    Some(next) if now < next => Err(CircuitError::Open {
                        retry_in: next - now,
                    }),
                    _ => {
                        tracing::debug!("circuit breaker half-open, admitting trial call");
                        inner.state = CircuitState::HalfOpen;
                        inner.trial_in_flight = true;
                        Ok(())
                    }
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    // Another caller's trial is pending; fail fast.
                    Err(CircuitError::Open {
                        retry_in: Duration::ZERO,
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        inner.success_count += 1;
        // Consecutive-failure semantics: any success clears the streak.
        inner.failure_count = 0;
        if inner.state == CircuitState::HalfOpen {
            tracing::info!("circuit breaker closed after successful trial");
            inner.state = CircuitState::Closed;
            inner.next_attempt_at = None;
        }
        inner.trial_in_flight = false;
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());
        match inner.state {
            CircuitState::HalfOpen => {
                tracing::warn!("trial call failed, circuit breaker reopened");
                inner.state = CircuitState::Open;
                inner.next_attempt_at = Some(Instant::now() + self.config.recovery_timeout);
                inner.trial_in_flight = false;
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                tracing::warn!(
                    failures = inner.failure_count,
                    "failure threshold reached, circuit breaker opened"
                );
                inner.state = CircuitState::Open;
                inner.next_attempt_at = Some(Instant::now() + self.config.recovery_timeout);
            }
            _ => {}
        }
    }

    /// Clear the trial flag after a non-counting error in half-open state.
    fn release_trial(&self) {
        let mut inner = self.lock();
        inner.trial_in_flight = false;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
