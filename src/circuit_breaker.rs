//! Circuit breaker pattern implementation

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::errors::{PoolError, PoolResult};

/// Circuit breaker state
///
/// # Examples
///
/// ```
/// use resilient_pool::{CircuitBreaker, CircuitState};
///
/// let breaker = CircuitBreaker::default();
/// assert_eq!(breaker.state(), CircuitState::Closed);
/// assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CircuitState {
    /// Circuit is closed - normal operation
    Closed,

    /// Circuit is open - failing fast
    Open,

    /// Circuit is half-open - one trial call allowed
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Snapshot of a breaker's counters
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: usize,
    pub last_failure_at: Option<Instant>,
    /// Calls that reached `execute`, admitted or not
    pub total_calls: u64,
    /// Calls rejected without running the operation
    pub rejected_calls: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: usize,
    last_failure_at: Option<Instant>,
    trial_in_flight: bool,
    /// Bumped by `reset`; outcomes of calls admitted earlier are ignored
    generation: u64,
    total_calls: u64,
    rejected_calls: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            trial_in_flight: false,
            generation: 0,
            total_calls: 0,
            rejected_calls: 0,
        }
    }
}

/// Circuit breaker for protecting against cascading failures
///
/// Clones share the same state.
///
/// # Examples
///
/// ```
/// use resilient_pool::{CircuitBreaker, CircuitBreakerConfig, ErrorKind, PoolError, PoolResult};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let breaker = CircuitBreaker::new(
///     CircuitBreakerConfig::new()
///         .with_failure_threshold(2)
///         .with_recovery_time(Duration::from_secs(60)),
/// )
/// .unwrap();
///
/// for _ in 0..2 {
///     let _ = breaker
///         .execute(|| async { PoolResult::<()>::Err(PoolError::network("down")) })
///         .await;
/// }
///
/// // Rejected without running the operation
/// let result = breaker.execute(|| async { PoolResult::Ok(1) }).await;
/// assert_eq!(result.unwrap_err().kind(), ErrorKind::CircuitOpen);
/// # }
/// ```
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<BreakerState>>,
    config: CircuitBreakerConfig,
}

/// Admission ticket for one call. A dropped trial ticket frees the
/// half-open slot without recording an outcome.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    generation: u64,
    settled: bool,
}

impl Admission<'_> {
    fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial, self.generation);
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial, self.generation);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            let mut state = self.breaker.inner.lock();
            if state.generation == self.generation {
                state.trial_in_flight = false;
            }
        }
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(config: CircuitBreakerConfig) -> PoolResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Mutex::new(BreakerState::new())),
            config,
        })
    }

    /// Get the current state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.inner.lock();
        CircuitBreakerStats {
            state: state.state,
            failure_count: state.failure_count,
            last_failure_at: state.last_failure_at,
            total_calls: state.total_calls,
            rejected_calls: state.rejected_calls,
        }
    }

    /// Run `operation` through the breaker.
    ///
    /// While open, fails with [`PoolError::CircuitOpen`] without calling
    /// `operation`. The operation's own result is returned unchanged.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> PoolResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PoolResult<T>>,
    {
        let admission = self.admit()?;
        let result = operation().await;
        match &result {
            Ok(_) => admission.succeed(),
            Err(_) => admission.fail(),
        }
        result
    }

    /// Reset the circuit breaker to closed.
    ///
    /// Calls admitted before the reset no longer affect the breaker when
    /// they complete.
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        info!("Manually resetting circuit breaker");
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.last_failure_at = None;
        state.trial_in_flight = false;
        state.generation = state.generation.wrapping_add(1);
    }

    fn admit(&self) -> PoolResult<Admission<'_>> {
        let mut state = self.inner.lock();
        state.total_calls += 1;

        let trial = match state.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let elapsed = state
                    .last_failure_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed <= self.config.recovery_time {
                    state.rejected_calls += 1;
                    return Err(PoolError::CircuitOpen {
                        retry_after: Some(self.config.recovery_time - elapsed),
                    });
                }
                info!("circuit breaker half-open, allowing trial call");
                state.state = CircuitState::HalfOpen;
                state.trial_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    state.rejected_calls += 1;
                    return Err(PoolError::CircuitOpen { retry_after: None });
                }
                state.trial_in_flight = true;
                true
            }
        };

        Ok(Admission {
            breaker: self,
            trial,
            generation: state.generation,
            settled: false,
        })
    }

    fn on_success(&self, trial: bool, generation: u64) {
        let mut state = self.inner.lock();
        if state.generation != generation {
            debug!("ignoring outcome of a call admitted before reset");
            return;
        }
        if trial {
            info!("circuit breaker closed after successful trial");
            state.state = CircuitState::Closed;
            state.trial_in_flight = false;
            state.failure_count = 0;
        } else if state.state == CircuitState::Closed {
            state.failure_count = 0;
        }
    }

    fn on_failure(&self, trial: bool, generation: u64) {
        let mut state = self.inner.lock();
        if state.generation != generation {
            debug!("ignoring outcome of a call admitted before reset");
            return;
        }
        state.failure_count += 1;
        state.last_failure_at = Some(Instant::now());

        if trial {
            warn!("circuit breaker trial failed, reopening");
            state.state = CircuitState::Open;
            state.trial_in_flight = false;
        } else if state.state == CircuitState::Closed {
            if state.failure_count >= self.config.failure_threshold {
                warn!(
                    failures = state.failure_count,
                    threshold = self.config.failure_threshold,
                    "circuit breaker opened"
                );
                state.state = CircuitState::Open;
            } else {
                debug!(failures = state.failure_count, "circuit breaker recorded failure");
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BreakerState::new())),
            config: CircuitBreakerConfig::default(),
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}
