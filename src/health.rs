//! Health monitoring for resource pools

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::eviction::{EvictionReason, ResourceId, deadline_after};
use crate::metrics::{MetricsTracker, PoolStats};
use crate::pool::{CheckIn, PoolInner};

/// Health status of a resource pool
///
/// # Examples
///
/// ```
/// use resilient_pool::{HealthStatus, PoolStats};
///
/// let stats = PoolStats { total: 3, idle: 3, max_connections: 10, min_connections: 2, ..Default::default() };
///
/// let health = HealthStatus::from_stats(&stats);
/// assert!(health.is_healthy());
/// assert_eq!(health.idle_resources, 3);
/// ```
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Current pool utilization (0.0 to 1.0)
    pub utilization: f64,

    pub idle_resources: usize,
    pub active_resources: usize,
    pub max_connections: usize,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Derive a health summary from a stats snapshot
    pub fn from_stats(stats: &PoolStats) -> Self {
        let utilization = stats.utilization();
        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        if stats.waiting > 0 {
            warnings.push(format!("{} callers waiting for a resource", stats.waiting));
            is_healthy = false;
        }

        if stats.unhealthy > 0 {
            warnings.push(format!("{} resources marked unhealthy", stats.unhealthy));
        }

        if stats.total + stats.pending < stats.min_connections {
            warnings.push(format!(
                "Below minimum: {} of {} resources",
                stats.total + stats.pending,
                stats.min_connections
            ));
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            idle_resources: stats.idle,
            active_resources: stats.active,
            max_connections: stats.max_connections,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}

/// Outcome of one health sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    /// Idle resources checked
    pub checked: usize,
    /// Checks that failed or returned unhealthy
    pub unhealthy: usize,
    /// Idle resources destroyed for age before probing
    pub expired: usize,
    /// Resources created to restore the minimum
    pub created: usize,
}

/// Start the periodic sweep. The task holds only a weak reference and
/// stops once the pool is gone or disposing. A sweep in progress is never
/// cancelled; `dispose` waits for it.
pub(crate) fn spawn_health_task<T: Send + Sync + 'static>(
    inner: &Arc<PoolInner<T>>,
) -> JoinHandle<()> {
    let pool: Weak<PoolInner<T>> = Arc::downgrade(inner);
    let shutdown = Arc::clone(&inner.shutdown);
    let period = inner.config.health_check_interval;

    inner.runtime.spawn(async move {
        let mut ticker = tokio::time::interval_at(deadline_after(period), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let stopped = shutdown.notified();
            tokio::pin!(stopped);
            stopped.as_mut().enable();
            if pool.upgrade().is_none_or(|inner| inner.is_disposing()) {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut stopped => break,
            }

            let Some(inner) = pool.upgrade() else {
                break;
            };
            if inner.is_disposing() {
                break;
            }
            run_health_check(&inner).await;
        }
    })
}

/// Check every idle resource, destroy the failures, then restore the
/// minimum.
///
/// Resources are taken out of the idle set one at a time, so everything
/// else stays available to `acquire` while a slow check runs. Checks run
/// without the pool lock held.
pub(crate) async fn run_health_check<T: Send + Sync + 'static>(
    inner: &Arc<PoolInner<T>>,
) -> HealthReport {
    let mut report = HealthReport::default();

    let (expired, queue) = {
        let mut guard = inner.state.lock();
        let state = &mut *guard;
        if state.disposing {
            return report;
        }

        let mut expired = Vec::new();
        let mut fresh = VecDeque::with_capacity(state.idle.len());
        for (id, value) in state.idle.drain(..) {
            match state.records.get(&id).map(|record| record.expiry(&inner.policy)) {
                None => expired.push((id, value, EvictionReason::Untracked)),
                Some(Some(reason)) => {
                    state.records.remove(&id);
                    expired.push((id, value, reason));
                }
                Some(None) => fresh.push_back((id, value)),
            }
        }
        let queue: Vec<ResourceId> = fresh.iter().map(|(id, _)| *id).collect();
        state.idle = fresh;
        if !expired.is_empty() {
            inner.offer_capacity(state);
        }
        (expired, queue)
    };

    report.expired = expired.len();
    for (id, value, reason) in expired {
        inner.spawn_destroy(id, value, reason);
    }

    for id in queue {
        // Lent out since the sweep started, or the pool is shutting down
        let Some(value) = inner.take_idle(id) else {
            continue;
        };
        report.checked += 1;

        // Runs as its own task so a panicking check cannot take the timer
        // down with it
        let check = inner.runtime.spawn(Check::new(inner, id, value).run());
        match check.await {
            Ok(true) => {}
            Ok(false) => report.unhealthy += 1,
            Err(err) => {
                report.unhealthy += 1;
                error!(resource = %id, error = %err, "health check task failed; resource destroyed");
            }
        }
    }

    report.created = inner.top_up().await;

    debug!(
        checked = report.checked,
        unhealthy = report.unhealthy,
        expired = report.expired,
        created = report.created,
        "health sweep finished"
    );
    report
}

/// One resource out of the idle set for a health check.
///
/// Owns the resource until it is checked back in. If the check panics or
/// its task is cancelled, the resource is destroyed on drop instead of
/// leaking its slot.
struct Check<T: Send + Sync + 'static> {
    inner: Arc<PoolInner<T>>,
    id: ResourceId,
    value: Option<T>,
}

impl<T: Send + Sync + 'static> Check<T> {
    fn new(inner: &Arc<PoolInner<T>>, id: ResourceId, value: T) -> Self {
        inner.begin_background();
        Self {
            inner: Arc::clone(inner),
            id,
            value: Some(value),
        }
    }

    async fn run(mut self) -> bool {
        let Some(value) = self.value.as_ref() else {
            return false;
        };
        let healthy = match self.inner.manager.health_check(value).await {
            Ok(healthy) => healthy,
            Err(err) => {
                debug!(resource = %self.id, error = %err, "health check errored");
                false
            }
        };

        if !healthy {
            MetricsTracker::incr(&self.inner.metrics.health_check_failures);
            warn!(resource = %self.id, "resource failed health check");
        }
        if let Some(value) = self.value.take() {
            self.inner.check_in(self.id, value, CheckIn::Checked { healthy });
        }
        healthy
    }
}

impl<T: Send + Sync + 'static> Drop for Check<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            MetricsTracker::incr(&self.inner.metrics.health_check_failures);
            self.inner.forget(self.id);
            self.inner.spawn_destroy(self.id, value, EvictionReason::Unhealthy);
        }
        self.inner.end_background();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturated_pool_is_unhealthy() {
        let stats = PoolStats {
            total: 10,
            active: 10,
            waiting: 2,
            max_connections: 10,
            ..Default::default()
        };
        let health = HealthStatus::from_stats(&stats);
        assert!(!health.is_healthy());
        assert_eq!(health.warning_count, 2);
    }

    #[test]
    fn test_below_minimum_warns_but_stays_healthy() {
        let stats = PoolStats {
            total: 1,
            idle: 1,
            max_connections: 10,
            min_connections: 3,
            ..Default::default()
        };
        let health = HealthStatus::from_stats(&stats);
        assert!(health.is_healthy());
        assert_eq!(health.warnings.len(), 1);
        assert!(health.warnings[0].starts_with("Below minimum"));
    }
}
