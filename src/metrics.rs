//! Pool statistics and metrics export

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of a pool
///
/// # Examples
///
/// ```
/// use resilient_pool::{FnManager, PoolConfig, PoolResult, ResourcePool};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> PoolResult<()> {
/// let manager = FnManager::new(
///     || async { PoolResult::Ok(1u8) },
///     |_r: u8| async { PoolResult::Ok(()) },
///     |_r: u8| async { PoolResult::Ok(true) },
/// );
/// let pool = ResourcePool::new(manager, PoolConfig::new().with_min_connections(1)).await?;
///
/// let guard = pool.acquire().await?;
/// let stats = pool.get_stats();
/// assert_eq!(stats.active, 1);
/// assert_eq!(stats.total_acquired, 1);
/// drop(guard);
/// pool.dispose().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolStats {
    /// Tracked resources (idle + active + being checked)
    pub total: usize,

    /// Resources lent to callers
    pub active: usize,

    /// Resources owned by the pool, including ones under a health check
    pub idle: usize,

    /// Tracked resources marked unhealthy and awaiting destruction
    pub unhealthy: usize,

    /// Creations in flight that already hold a slot
    pub pending: usize,

    /// Callers parked behind a full pool
    pub waiting: usize,

    pub max_connections: usize,
    pub min_connections: usize,

    pub total_created: u64,
    pub total_destroyed: u64,
    pub total_acquired: u64,
    pub total_released: u64,
    pub acquire_timeouts: u64,
    pub creation_failures: u64,
    pub health_check_failures: u64,
}

impl PoolStats {
    /// Ratio of active resources to the configured maximum (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.max_connections > 0 {
            self.active as f64 / self.max_connections as f64
        } else {
            0.0
        }
    }

    /// Export stats as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total".to_string(), self.total.to_string());
        metrics.insert("active".to_string(), self.active.to_string());
        metrics.insert("idle".to_string(), self.idle.to_string());
        metrics.insert("unhealthy".to_string(), self.unhealthy.to_string());
        metrics.insert("pending".to_string(), self.pending.to_string());
        metrics.insert("waiting".to_string(), self.waiting.to_string());
        metrics.insert("max_connections".to_string(), self.max_connections.to_string());
        metrics.insert("min_connections".to_string(), self.min_connections.to_string());
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("total_destroyed".to_string(), self.total_destroyed.to_string());
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("acquire_timeouts".to_string(), self.acquire_timeouts.to_string());
        metrics.insert("creation_failures".to_string(), self.creation_failures.to_string());
        metrics.insert(
            "health_check_failures".to_string(),
            self.health_check_failures.to_string(),
        );
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization()));
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export stats in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use resilient_pool::{MetricsExporter, PoolStats};
    /// use std::collections::HashMap;
    ///
    /// let stats = PoolStats { active: 2, max_connections: 10, ..Default::default() };
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&stats, "db", Some(&tags)).unwrap();
    /// assert!(output.contains("resource_pool_active"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        stats: &PoolStats,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> crate::PoolResult<String> {
        use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let mut labels = tags.cloned().unwrap_or_default();
        labels.insert("pool".to_string(), pool_name.to_string());

        let registry = Registry::new_custom(Some("resource_pool".to_string()), Some(labels))
            .map_err(Self::encode_error)?;

        let gauges: [(&str, &str, usize); 7] = [
            ("total", "Tracked resources", stats.total),
            ("active", "Resources lent to callers", stats.active),
            ("idle", "Resources owned by the pool", stats.idle),
            ("unhealthy", "Resources awaiting destruction", stats.unhealthy),
            ("waiting", "Callers waiting for a resource", stats.waiting),
            ("max_connections", "Configured maximum", stats.max_connections),
            ("min_connections", "Configured minimum", stats.min_connections),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::with_opts(Opts::new(name, help)).map_err(Self::encode_error)?;
            gauge.set(i64::try_from(value).unwrap_or(i64::MAX));
            registry
                .register(Box::new(gauge))
                .map_err(Self::encode_error)?;
        }

        let counters: [(&str, &str, u64); 7] = [
            ("created_total", "Resources created", stats.total_created),
            ("destroyed_total", "Resources destroyed", stats.total_destroyed),
            ("acquired_total", "Successful acquisitions", stats.total_acquired),
            ("released_total", "Releases back to the pool", stats.total_released),
            ("acquire_timeouts_total", "Acquisitions that timed out", stats.acquire_timeouts),
            ("creation_failures_total", "Failed creations", stats.creation_failures),
            (
                "health_check_failures_total",
                "Failed health checks",
                stats.health_check_failures,
            ),
        ];
        for (name, help, value) in counters {
            let counter =
                IntCounter::with_opts(Opts::new(name, help)).map_err(Self::encode_error)?;
            counter.inc_by(value);
            registry
                .register(Box::new(counter))
                .map_err(Self::encode_error)?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(Self::encode_error)?;
        String::from_utf8(buffer).map_err(|e| crate::PoolError::Internal(e.to_string()))
    }

    fn encode_error(err: prometheus::Error) -> crate::PoolError {
        crate::PoolError::Internal(format!("metrics export failed: {err}"))
    }
}

/// Lifetime counters shared between the pool and its background tasks
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    pub created: AtomicU64,
    pub destroyed: AtomicU64,
    pub acquired: AtomicU64,
    pub released: AtomicU64,
    pub acquire_timeouts: AtomicU64,
    pub creation_failures: AtomicU64,
    pub health_check_failures: AtomicU64,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters into a stats snapshot
    pub fn fill(&self, stats: &mut PoolStats) {
        stats.total_created = self.created.load(Ordering::Relaxed);
        stats.total_destroyed = self.destroyed.load(Ordering::Relaxed);
        stats.total_acquired = self.acquired.load(Ordering::Relaxed);
        stats.total_released = self.released.load(Ordering::Relaxed);
        stats.acquire_timeouts = self.acquire_timeouts.load(Ordering::Relaxed);
        stats.creation_failures = self.creation_failures.load(Ordering::Relaxed);
        stats.health_check_failures = self.health_check_failures.load(Ordering::Relaxed);
    }
}
