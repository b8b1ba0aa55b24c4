//! Deadline guard for async operations

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::errors::{PoolError, PoolResult};

/// Races an operation against a deadline.
///
/// The operation runs as its own task, so losing the race does not cancel
/// it. Callers that need cancellation must pass a signal into the
/// operation themselves.
///
/// # Examples
///
/// ```
/// use resilient_pool::{ErrorKind, PoolResult, TimeoutGuard};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let guard = TimeoutGuard::new(Duration::from_millis(20));
///
/// let err = guard
///     .execute(async {
///         tokio::time::sleep(Duration::from_secs(1)).await;
///         PoolResult::Ok(())
///     })
///     .await
///     .unwrap_err();
/// assert_eq!(err.kind(), ErrorKind::Timeout);
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutGuard {
    duration: Duration,
}

impl TimeoutGuard {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Returns the operation's own result if it settles in time, or
    /// [`PoolError::Timeout`] otherwise
    pub async fn execute<T, Fut>(&self, operation: Fut) -> PoolResult<T>
    where
        T: Send + 'static,
        Fut: Future<Output = PoolResult<T>> + Send + 'static,
    {
        let task = tokio::spawn(operation);
        match tokio::time::timeout(self.duration, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => Err(PoolError::Internal(format!("guarded operation failed: {err}"))),
            Err(_) => {
                debug!(timeout = ?self.duration, "operation timed out; left running");
                Err(PoolError::Timeout(self.duration))
            }
        }
    }
}

/// Shorthand for `TimeoutGuard::new(duration).execute(operation)`
pub async fn with_timeout<T, Fut>(operation: Fut, duration: Duration) -> PoolResult<T>
where
    T: Send + 'static,
    Fut: Future<Output = PoolResult<T>> + Send + 'static,
{
    TimeoutGuard::new(duration).execute(operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_fast_operation_wins() {
        let result = with_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                PoolResult::Ok("ok")
            },
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(result.unwrap(), "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_operation_times_out_and_keeps_running() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let started = Instant::now();

        let err = with_timeout(
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                flag.store(true, Ordering::SeqCst);
                PoolResult::Ok(())
            },
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(50) && waited < Duration::from_millis(60));
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_inner_failure_passes_through() {
        let err = TimeoutGuard::new(Duration::from_secs(1))
            .execute(async { PoolResult::<()>::Err(PoolError::not_found("missing").with_code("E404")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.code(), "E404");
    }
}
