#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use resilient_pool::{PoolConfig, PoolError, PoolResult, ResourceManager, ResourcePool, async_trait};

/// Hands out sequential ids and records every destroy
#[derive(Default)]
pub struct Tracker {
    next: AtomicU32,
    pub destroyed: Mutex<Vec<u32>>,
    pub unhealthy: Mutex<HashSet<u32>>,
    pub create_delay: Duration,
    pub fail_creates: Mutex<bool>,
    checks: AtomicU32,
    pub check_delay: Duration,
    pub panic_on_check: AtomicBool,
}

impl Tracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_create_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            create_delay: delay,
            ..Self::default()
        })
    }

    pub fn with_check_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            check_delay: delay,
            ..Self::default()
        })
    }

    pub fn created(&self) -> u32 {
        self.next.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> Vec<u32> {
        let mut ids = self.destroyed.lock().clone();
        ids.sort_unstable();
        ids
    }

    /// Health checks begun so far, finished or not
    pub fn checks_started(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn mark_unhealthy(&self, id: u32) {
        self.unhealthy.lock().insert(id);
    }
}

#[async_trait]
impl ResourceManager<u32> for Tracker {
    async fn create(&self) -> PoolResult<u32> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if *self.fail_creates.lock() {
            return Err(PoolError::network("connection refused").with_code("ECONNREFUSED"));
        }
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }

    async fn destroy(&self, resource: u32) -> PoolResult<()> {
        self.destroyed.lock().push(resource);
        Ok(())
    }

    async fn health_check(&self, resource: &u32) -> PoolResult<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_check.load(Ordering::SeqCst) {
            panic!("health check crashed on resource {resource}");
        }
        if !self.check_delay.is_zero() {
            tokio::time::sleep(self.check_delay).await;
        }
        Ok(!self.unhealthy.lock().contains(resource))
    }
}

/// Pool whose background sweep stays out of the way of the test
pub fn quiet_config(min: usize, max: usize) -> PoolConfig {
    PoolConfig::new()
        .with_min_connections(min)
        .with_max_connections(max)
        .with_acquire_timeout(Duration::from_millis(200))
        .with_health_check_interval(Duration::from_secs(3600))
}

pub async fn pool_with(tracker: &Arc<Tracker>, config: PoolConfig) -> ResourcePool<u32> {
    let manager: Arc<dyn ResourceManager<u32>> = tracker.clone();
    ResourcePool::with_manager(manager, config)
        .await
        .expect("valid pool config")
}

/// Yield until `waiting` callers are parked on the pool
pub async fn until_waiting(pool: &ResourcePool<u32>, waiting: usize) {
    while pool.get_stats().waiting < waiting {
        tokio::task::yield_now().await;
    }
}
