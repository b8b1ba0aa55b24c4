//! Bounded retry with linear or exponential backoff

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::{PoolError, PoolResult};

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Backoff {
    /// `base_delay * n`
    Linear,
    /// `base_delay * 2^(n-1)`
    #[default]
    Exponential,
}

/// Retry parameters for a single call site
///
/// # Examples
///
/// ```
/// use resilient_pool::{Backoff, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new()
///     .with_base_delay(Duration::from_millis(100))
///     .with_backoff(Backoff::Exponential);
///
/// assert_eq!(policy.delay_for(1), Duration::from_millis(100));
/// assert_eq!(policy.delay_for(2), Duration::from_millis(200));
/// assert_eq!(policy.delay_for(3), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero behaves like one.
    pub max_attempts: u32,

    pub base_delay: Duration,

    pub backoff: Backoff,

    /// Error codes or kind names worth retrying. Empty retries everything.
    pub retryable_error_codes: Vec<String>,

    /// With no explicit codes, defer to [`PoolError::is_retryable`]
    pub use_error_classification: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff: Backoff::default(),
            retryable_error_codes: Vec::new(),
            use_error_classification: false,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Only retry errors whose code or kind name is listed
    pub fn with_retryable_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_error_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    /// Skip errors that [`PoolError::is_retryable`] rules out, such as an
    /// open circuit or a disposing pool
    pub fn retry_on_classified(mut self) -> Self {
        self.use_error_classification = true;
        self
    }

    /// Delay after `attempts_made` failed attempts. Saturates instead of
    /// overflowing.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let n = attempts_made.max(1);
        match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(n),
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(n - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        }
    }

    /// Whether `err` may be retried under this policy
    pub fn should_retry(&self, err: &PoolError) -> bool {
        if !self.retryable_error_codes.is_empty() {
            err.matches_any(&self.retryable_error_codes)
        } else if self.use_error_classification {
            err.is_retryable()
        } else {
            true
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

type RetryHook = Arc<dyn Fn(u32, &PoolError) + Send + Sync>;

/// Runs an operation under a [`RetryPolicy`]
///
/// # Examples
///
/// ```
/// use resilient_pool::{PoolError, PoolResult, RetryExecutor, RetryPolicy};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let calls = AtomicU32::new(0);
/// let executor = RetryExecutor::new(
///     RetryPolicy::new().with_base_delay(Duration::from_millis(1)),
/// )
/// .on_retry(|attempt, err| eprintln!("attempt {attempt} failed: {err}"));
///
/// let value = executor
///     .execute(|| async {
///         if calls.fetch_add(1, Ordering::SeqCst) == 0 {
///             Err(PoolError::network("flaky"))
///         } else {
///             PoolResult::Ok("done")
///         }
///     })
///     .await
///     .unwrap();
///
/// assert_eq!(value, "done");
/// assert_eq!(calls.load(Ordering::SeqCst), 2);
/// # }
/// ```
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    on_retry: Option<RetryHook>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            on_retry: None,
        }
    }

    /// Observe each failed attempt before the wait that follows it
    pub fn on_retry<H>(mut self, hook: H) -> Self
    where
        H: Fn(u32, &PoolError) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Call `operation` until it succeeds, fails with an error the policy
    /// won't retry, or runs out of attempts. Returns the last error.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> PoolResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PoolResult<T>>,
    {
        let max_attempts = self.policy.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %err, "retries exhausted");
                return Err(err);
            }
            if !self.policy.should_retry(&err) {
                debug!(attempt, code = err.code(), "error is not retryable");
                return Err(err);
            }

            let delay = self.policy.delay_for(attempt);
            if let Some(hook) = &self.on_retry {
                hook(attempt, &err);
            }
            debug!(attempt, ?delay, error = %err, "retrying after failure");
            tokio::time::sleep(delay).await;
        }
    }
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Shorthand for `RetryExecutor::new(policy).execute(operation)`
pub async fn with_retry<T, F, Fut>(operation: F, policy: RetryPolicy) -> PoolResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PoolResult<T>>,
{
    RetryExecutor::new(policy).execute(operation).await
}
