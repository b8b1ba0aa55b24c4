//! Core resource pool implementation

use crate::config::PoolConfig;
use crate::errors::{PoolError, PoolResult};
use crate::eviction::{
    EvictionPolicy, EvictionReason, ResourceId, ResourceRecord, ResourceStatus, deadline_after,
};
use crate::health::{self, HealthReport, HealthStatus};
use crate::manager::ResourceManager;
use crate::metrics::{MetricsTracker, PoolStats};

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::runtime::Handle;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A resource lent out by the pool. Returned to the pool when dropped.
pub struct PooledResource<T: Send + Sync + 'static> {
    value: Option<T>,
    id: ResourceId,
    created_at: Instant,
    invalidated: bool,
    pool: Arc<PoolInner<T>>,
}

impl<T: Send + Sync + 'static> PooledResource<T> {
    fn new(value: T, id: ResourceId, created_at: Instant, pool: Arc<PoolInner<T>>) -> Self {
        Self {
            value: Some(value),
            id,
            created_at,
            invalidated: false,
            pool,
        }
    }

    /// Identifier the pool assigned at creation
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// When the underlying resource was created
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Mark the resource as broken. It is destroyed on release instead of
    /// going back to the idle set.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
        if let Some(record) = self.pool.state.lock().records.get_mut(&self.id) {
            record.healthy = false;
        }
    }

    /// Take the resource out of the pool for good. Its slot is freed and
    /// the caller becomes responsible for tearing it down.
    pub fn detach(self) -> Option<T> {
        let pool = Arc::clone(&self.pool);
        let (id, value) = self.into_parts()?;
        pool.forget(id);
        Some(value)
    }

    /// Disarm the guard and hand back its contents without a release
    fn into_parts(mut self) -> Option<(ResourceId, T)> {
        self.value.take().map(|value| (self.id, value))
    }
}

impl<T: Send + Sync + 'static> Deref for PooledResource<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.value.as_ref().expect("Value already taken")
    }
}

impl<T: Send + Sync + 'static> DerefMut for PooledResource<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.value.as_mut().expect("Value already taken")
    }
}

impl<T: Send + Sync + 'static> Drop for PooledResource<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            MetricsTracker::incr(&self.pool.metrics.released);
            let origin = CheckIn::Released {
                invalidated: self.invalidated,
            };
            self.pool.check_in(self.id, value, origin);
        }
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for PooledResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledResource")
            .field("id", &self.id)
            .field("invalidated", &self.invalidated)
            .finish_non_exhaustive()
    }
}

/// A reserved slot under `max_connections` for a resource being created.
/// Dropping an unused slot gives the capacity back.
pub(crate) struct CreateSlot<T: Send + Sync + 'static> {
    pool: Arc<PoolInner<T>>,
    armed: bool,
}

impl<T: Send + Sync + 'static> CreateSlot<T> {
    /// Caller must already have counted the slot in `pending`
    fn new(pool: Arc<PoolInner<T>>) -> Self {
        Self { pool, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }

    /// Create a resource and lend it to the caller
    async fn fill(self) -> PoolResult<PooledResource<T>> {
        let pool = Arc::clone(&self.pool);
        match pool.create_instance().await {
            Ok(value) => self.commit(value),
            Err(err) => Err(err),
        }
    }

    /// Create a resource and park it in the idle set
    pub(crate) async fn fill_idle(self) -> PoolResult<ResourceId> {
        let pool = Arc::clone(&self.pool);
        let value = pool.create_instance().await?;
        self.commit_idle(value)
    }

    fn commit(mut self, value: T) -> PoolResult<PooledResource<T>> {
        self.armed = false;
        let pool = Arc::clone(&self.pool);
        let id = pool.next_resource_id();

        let mut state = pool.state.lock();
        state.pending -= 1;
        if state.disposing {
            drop(state);
            pool.spawn_destroy(id, value, EvictionReason::Disposed);
            return Err(PoolError::PoolDisposing);
        }
        let record = ResourceRecord::new(ResourceStatus::InUse);
        let created_at = record.created_at;
        state.records.insert(id, record);
        drop(state);
        debug!(resource = %id, "resource created");

        MetricsTracker::incr(&pool.metrics.acquired);
        Ok(PooledResource::new(value, id, created_at, pool))
    }

    fn commit_idle(mut self, value: T) -> PoolResult<ResourceId> {
        self.armed = false;
        let pool = Arc::clone(&self.pool);
        let id = pool.next_resource_id();

        let mut guard = pool.state.lock();
        let state = &mut *guard;
        state.pending -= 1;
        if state.disposing {
            drop(guard);
            pool.spawn_destroy(id, value, EvictionReason::Disposed);
            return Err(PoolError::PoolDisposing);
        }
        state
            .records
            .insert(id, ResourceRecord::new(ResourceStatus::Idle));
        pool.hand_off_or_idle(state, id, value);
        drop(guard);
        debug!(resource = %id, "resource created");
        Ok(id)
    }
}

impl<T: Send + Sync + 'static> Drop for CreateSlot<T> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release_slot();
        }
    }
}

/// What a parked caller receives
enum Handoff<T: Send + Sync + 'static> {
    Ready(PooledResource<T>),
    Create(CreateSlot<T>),
}

impl<T: Send + Sync + 'static> Handoff<T> {
    /// Undo a handoff that could not be delivered. Must not run the
    /// guards' drop logic, since the caller holds the state lock.
    fn reclaim(self) -> Option<(ResourceId, T)> {
        match self {
            Self::Ready(resource) => resource.into_parts(),
            Self::Create(slot) => {
                slot.disarm();
                None
            }
        }
    }
}

/// How a resource came back to the pool
#[derive(Debug, Clone, Copy)]
pub(crate) enum CheckIn {
    /// A caller finished with it
    Released { invalidated: bool },
    /// A health sweep finished checking it; idle time keeps running
    Checked { healthy: bool },
}

enum Checkout<T: Send + Sync + 'static> {
    Ready(PooledResource<T>),
    Create(CreateSlot<T>),
    Wait(oneshot::Receiver<Handoff<T>>),
    Full,
    Disposing,
}

/// Mutable pool state, guarded by a single lock
pub(crate) struct PoolState<T: Send + Sync + 'static> {
    pub records: HashMap<ResourceId, ResourceRecord>,
    /// Idle resources, most recently returned at the back
    pub idle: VecDeque<(ResourceId, T)>,
    waiters: VecDeque<oneshot::Sender<Handoff<T>>>,
    pub pending: usize,
    pub disposing: bool,
}

impl<T: Send + Sync + 'static> PoolState<T> {
    fn new(capacity: usize) -> Self {
        Self {
            records: HashMap::with_capacity(capacity),
            idle: VecDeque::with_capacity(capacity),
            waiters: VecDeque::new(),
            pending: 0,
            disposing: false,
        }
    }

    /// Resources that exist or are being created
    pub fn live(&self) -> usize {
        self.records.len() + self.pending
    }
}

pub(crate) struct PoolInner<T: Send + Sync + 'static> {
    pub config: PoolConfig,
    pub policy: EvictionPolicy,
    pub manager: Arc<dyn ResourceManager<T>>,
    pub state: Mutex<PoolState<T>>,
    pub metrics: MetricsTracker,
    pub runtime: Handle,
    next_id: AtomicU64,
    /// Destroys and health checks `dispose` has to wait for
    background_in_flight: AtomicUsize,
    background_done: Notify,
    /// Wakes the health timer when the pool starts disposing
    pub shutdown: Arc<Notify>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + Sync + 'static> PoolInner<T> {
    fn next_resource_id(&self) -> ResourceId {
        ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_disposing(&self) -> bool {
        self.state.lock().disposing
    }

    async fn create_instance(&self) -> PoolResult<T> {
        match self.manager.create().await {
            Ok(value) => {
                MetricsTracker::incr(&self.metrics.created);
                Ok(value)
            }
            Err(err) => {
                MetricsTracker::incr(&self.metrics.creation_failures);
                warn!(error = %err, code = err.code(), "resource creation failed");
                Err(err)
            }
        }
    }

    /// Take an idle resource, reserve a creation slot, or queue up
    fn checkout(self: &Arc<Self>, enqueue: bool) -> Checkout<T> {
        let mut expired = Vec::new();
        let checkout = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.disposing {
                return Checkout::Disposing;
            }

            state.waiters.retain(|waiter| !waiter.is_closed());
            let mut found = None;
            if state.waiters.is_empty() {
                while let Some((id, value)) = state.idle.pop_back() {
                    let Some(record) = state.records.get_mut(&id) else {
                        expired.push((id, value, EvictionReason::Untracked));
                        continue;
                    };
                    if let Some(reason) = record.expiry(&self.policy) {
                        state.records.remove(&id);
                        expired.push((id, value, reason));
                        continue;
                    }
                    record.status = ResourceStatus::InUse;
                    MetricsTracker::incr(&self.metrics.acquired);
                    found = Some(Checkout::Ready(PooledResource::new(
                        value,
                        id,
                        record.created_at,
                        Arc::clone(self),
                    )));
                    break;
                }
                if found.is_none() && state.live() < self.config.max_connections {
                    state.pending += 1;
                    found = Some(Checkout::Create(CreateSlot::new(Arc::clone(self))));
                }
            }

            match found {
                Some(checkout) => checkout,
                None if enqueue => {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    Checkout::Wait(rx)
                }
                None => Checkout::Full,
            }
        };

        for (id, value, reason) in expired {
            self.spawn_destroy(id, value, reason);
        }
        checkout
    }

    /// Return a resource to the pool. Destroys it when it is no longer fit
    /// to be handed out.
    pub(crate) fn check_in(self: &Arc<Self>, id: ResourceId, value: T, origin: CheckIn) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let eviction = match state.records.get_mut(&id) {
            None => Some(EvictionReason::Untracked),
            Some(_) if state.disposing => Some(EvictionReason::Disposed),
            Some(record) => {
                match origin {
                    CheckIn::Released { invalidated } => {
                        if invalidated {
                            record.healthy = false;
                        }
                        record.touch();
                    }
                    CheckIn::Checked { healthy } => record.healthy = healthy,
                }
                record.status = ResourceStatus::Idle;
                record.expiry(&self.policy)
            }
        };

        match eviction {
            Some(reason) => {
                if state.records.remove(&id).is_some() {
                    self.offer_capacity(state);
                }
                drop(guard);
                if reason == EvictionReason::Untracked {
                    warn!(resource = %id, "released resource is not tracked by this pool; destroying it");
                }
                self.spawn_destroy(id, value, reason);
            }
            None => self.hand_off_or_idle(state, id, value),
        }
    }

    /// Give a resource to the longest-waiting caller, or park it as idle
    fn hand_off_or_idle(self: &Arc<Self>, state: &mut PoolState<T>, id: ResourceId, value: T) {
        let Some(created_at) = state.records.get(&id).map(|record| record.created_at) else {
            self.spawn_destroy(id, value, EvictionReason::Untracked);
            return;
        };

        let mut value = value;
        while let Some(waiter) = state.waiters.pop_front() {
            let resource = PooledResource::new(value, id, created_at, Arc::clone(self));
            match waiter.send(Handoff::Ready(resource)) {
                Ok(()) => {
                    if let Some(record) = state.records.get_mut(&id) {
                        record.status = ResourceStatus::InUse;
                    }
                    MetricsTracker::incr(&self.metrics.acquired);
                    return;
                }
                Err(handoff) => match handoff.reclaim() {
                    Some((_, reclaimed)) => value = reclaimed,
                    None => return,
                },
            }
        }

        if let Some(record) = state.records.get_mut(&id) {
            record.status = ResourceStatus::Idle;
        }
        state.idle.push_back((id, value));
    }

    /// Hand freed capacity to the longest-waiting caller as a creation slot
    pub(crate) fn offer_capacity(self: &Arc<Self>, state: &mut PoolState<T>) {
        if state.disposing {
            return;
        }
        while state.live() < self.config.max_connections {
            let Some(waiter) = state.waiters.pop_front() else {
                return;
            };
            state.pending += 1;
            match waiter.send(Handoff::Create(CreateSlot::new(Arc::clone(self)))) {
                Ok(()) => return,
                Err(handoff) => {
                    state.pending -= 1;
                    handoff.reclaim();
                }
            }
        }
    }

    fn release_slot(self: &Arc<Self>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.pending = state.pending.saturating_sub(1);
        self.offer_capacity(state);
    }

    /// Stop tracking a resource whose instance left the pool's hands
    pub(crate) fn forget(self: &Arc<Self>, id: ResourceId) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.records.remove(&id).is_some() {
            self.offer_capacity(state);
        }
    }

    /// Take one idle resource out for a health check. `None` once the
    /// resource has been lent out or the pool is disposing.
    pub(crate) fn take_idle(&self, id: ResourceId) -> Option<T> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.disposing {
            return None;
        }
        let position = state.idle.iter().position(|(idle_id, _)| *idle_id == id)?;
        let (_, value) = state.idle.remove(position)?;
        if let Some(record) = state.records.get_mut(&id) {
            record.status = ResourceStatus::Checking;
        }
        Some(value)
    }

    pub(crate) fn begin_background(&self) {
        self.background_in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn end_background(&self) {
        if self.background_in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.background_done.notify_waiters();
        }
    }

    /// Destroy a resource in the background. `dispose` waits for these.
    pub(crate) fn spawn_destroy(self: &Arc<Self>, id: ResourceId, value: T, reason: EvictionReason) {
        self.begin_background();
        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            match inner.manager.destroy(value).await {
                Ok(()) => debug!(resource = %id, %reason, "resource destroyed"),
                Err(err) => {
                    warn!(resource = %id, %reason, error = %err, "failed to destroy resource")
                }
            }
            MetricsTracker::incr(&inner.metrics.destroyed);
            inner.end_background();
        });
    }

    async fn wait_for_background(&self) {
        loop {
            let notified = self.background_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.background_in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Reserve slots up to `min_connections` and fill them concurrently
    pub(crate) async fn top_up(self: &Arc<Self>) -> usize {
        let deficit = {
            let mut state = self.state.lock();
            if state.disposing {
                return 0;
            }
            let missing = self.config.min_connections.saturating_sub(state.live());
            let room = self.config.max_connections.saturating_sub(state.live());
            let deficit = missing.min(room);
            state.pending += deficit;
            deficit
        };

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..deficit {
            let slot = CreateSlot::new(Arc::clone(self));
            tasks.spawn_on(slot.fill_idle(), &self.runtime);
        }

        let mut created = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(_)) => created += 1,
                Ok(Err(PoolError::PoolDisposing)) => {}
                Ok(Err(err)) => warn!(error = %err, "failed to create minimum resource"),
                Err(err) => warn!(error = %err, "minimum resource creation task failed"),
            }
        }
        created
    }
}

/// Async pool of expensive resources with bounded size, health checks and
/// age-based eviction.
///
/// # Examples
///
/// ```
/// use resilient_pool::{FnManager, PoolConfig, PoolResult, ResourcePool};
///
/// # #[tokio::main]
/// # async fn main() -> PoolResult<()> {
/// let manager = FnManager::new(
///     || async { PoolResult::Ok(String::from("connection")) },
///     |_conn: String| async { PoolResult::Ok(()) },
///     |_conn: String| async { PoolResult::Ok(true) },
/// );
///
/// let pool = ResourcePool::new(manager, PoolConfig::default()).await?;
/// {
///     let conn = pool.acquire().await?;
///     assert_eq!(conn.as_str(), "connection");
///     // Returned to the pool when `conn` goes out of scope
/// }
/// pool.dispose().await;
/// # Ok(())
/// # }
/// ```
pub struct ResourcePool<T: Send + Sync + 'static> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Send + Sync + 'static> Clone for ResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for ResourcePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("config", &self.inner.config)
            .field("stats", &self.get_stats())
            .finish()
    }
}

impl<T: Send + Sync + 'static> ResourcePool<T> {
    /// Create a pool, eagerly fill it to `min_connections` and start the
    /// health-check timer. Must be called inside a Tokio runtime.
    ///
    /// Creation failures during bootstrap are logged; the next health
    /// sweep tops the pool up again.
    pub async fn new<M>(manager: M, config: PoolConfig) -> PoolResult<Self>
    where
        M: ResourceManager<T>,
    {
        Self::with_manager(Arc::new(manager), config).await
    }

    /// Create a pool from a shared manager
    pub async fn with_manager(
        manager: Arc<dyn ResourceManager<T>>,
        config: PoolConfig,
    ) -> PoolResult<Self> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            policy: EvictionPolicy::from(&config),
            state: Mutex::new(PoolState::new(config.max_connections)),
            manager,
            metrics: MetricsTracker::new(),
            runtime: Handle::current(),
            next_id: AtomicU64::new(1),
            background_in_flight: AtomicUsize::new(0),
            background_done: Notify::new(),
            shutdown: Arc::new(Notify::new()),
            health_task: Mutex::new(None),
            config,
        });

        let created = inner.top_up().await;
        *inner.health_task.lock() = Some(health::spawn_health_task(&inner));

        info!(
            min = inner.config.min_connections,
            max = inner.config.max_connections,
            created,
            "resource pool created"
        );

        Ok(Self { inner })
    }

    /// Get a resource for exclusive use.
    ///
    /// Serves a fresh idle resource, creates one while under
    /// `max_connections`, or waits in FIFO order for a release until
    /// `acquire_timeout` elapses.
    pub async fn acquire(&self) -> PoolResult<PooledResource<T>> {
        let timeout = self.inner.config.acquire_timeout;
        let deadline = deadline_after(timeout);

        let handoff = match self.inner.checkout(true) {
            Checkout::Ready(resource) => return Ok(resource),
            Checkout::Create(slot) => Handoff::Create(slot),
            Checkout::Disposing => return Err(PoolError::PoolDisposing),
            Checkout::Full => return Err(self.acquire_timed_out()),
            Checkout::Wait(mut rx) => {
                let sleep = tokio::time::sleep_until(deadline);
                tokio::pin!(sleep);
                tokio::select! {
                    biased;
                    received = &mut rx => match received {
                        Ok(handoff) => handoff,
                        Err(_) => return Err(PoolError::PoolDisposing),
                    },
                    _ = &mut sleep => {
                        // A release may have raced the deadline
                        rx.close();
                        match rx.try_recv() {
                            Ok(handoff) => handoff,
                            Err(_) => return Err(self.acquire_timed_out()),
                        }
                    }
                }
            }
        };

        match handoff {
            Handoff::Ready(resource) => Ok(resource),
            Handoff::Create(slot) => {
                // Creation keeps going if this caller gives up; the result
                // lands in the idle set when the orphaned guard drops.
                let creation = self.inner.runtime.spawn(slot.fill());
                match tokio::time::timeout_at(deadline, creation).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(err)) => Err(PoolError::Internal(format!(
                        "resource creation task failed: {err}"
                    ))),
                    Err(_) => Err(self.acquire_timed_out()),
                }
            }
        }
    }

    /// Get a resource without waiting. Returns `Ok(None)` when the pool is
    /// at capacity with nothing idle.
    pub async fn try_acquire(&self) -> PoolResult<Option<PooledResource<T>>> {
        match self.inner.checkout(false) {
            Checkout::Ready(resource) => Ok(Some(resource)),
            Checkout::Create(slot) => slot.fill().await.map(Some),
            Checkout::Disposing => Err(PoolError::PoolDisposing),
            Checkout::Full | Checkout::Wait(_) => Ok(None),
        }
    }

    /// Return a resource to the pool. Same as dropping it.
    ///
    /// A resource that belongs to another pool is destroyed with this
    /// pool's manager and forgotten by its owner.
    pub fn release(&self, resource: PooledResource<T>) {
        if Arc::ptr_eq(&resource.pool, &self.inner) {
            drop(resource);
            return;
        }

        let owner = Arc::clone(&resource.pool);
        if let Some((id, value)) = resource.into_parts() {
            warn!(resource = %id, "resource released to a pool that does not own it");
            owner.forget(id);
            MetricsTracker::incr(&self.inner.metrics.released);
            self.inner.spawn_destroy(id, value, EvictionReason::Untracked);
        }
    }

    /// Snapshot of pool counts and lifetime counters
    pub fn get_stats(&self) -> PoolStats {
        let mut stats = {
            let state = self.inner.state.lock();
            let mut stats = PoolStats {
                total: state.records.len(),
                pending: state.pending,
                waiting: state.waiters.iter().filter(|w| !w.is_closed()).count(),
                max_connections: self.inner.config.max_connections,
                min_connections: self.inner.config.min_connections,
                ..Default::default()
            };
            for record in state.records.values() {
                match record.status {
                    ResourceStatus::InUse => stats.active += 1,
                    ResourceStatus::Idle | ResourceStatus::Checking => stats.idle += 1,
                }
                if !record.healthy {
                    stats.unhealthy += 1;
                }
            }
            stats
        };
        self.inner.metrics.fill(&mut stats);
        stats
    }

    /// Summary of pool health derived from the current stats
    pub fn health_status(&self) -> HealthStatus {
        HealthStatus::from_stats(&self.get_stats())
    }

    /// Run one health sweep now instead of waiting for the timer
    pub async fn run_health_check(&self) -> HealthReport {
        health::run_health_check(&self.inner).await
    }

    /// The configuration this pool was built with
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposing()
    }

    /// Shut the pool down.
    ///
    /// Stops the health timer, fails every waiting and future `acquire`
    /// with [`PoolError::PoolDisposing`], destroys all idle resources and
    /// waits for every pending destroy. A sweep that is already running
    /// finishes its current health check and the checked resource is
    /// destroyed with the rest. Resources still lent out are destroyed
    /// when released. Safe to call more than once.
    pub async fn dispose(&self) {
        let (first, idle, outstanding) = {
            let mut state = self.inner.state.lock();
            let first = !state.disposing;
            state.disposing = true;
            // Dropping the senders wakes every waiter with `PoolDisposing`
            state.waiters.clear();
            let idle: Vec<_> = state.idle.drain(..).collect();
            for (id, _) in &idle {
                state.records.remove(id);
            }
            (first, idle, state.records.len())
        };

        if first {
            info!(idle = idle.len(), outstanding, "disposing resource pool");
        }
        self.inner.shutdown.notify_waiters();

        for (id, value) in idle {
            self.inner.spawn_destroy(id, value, EvictionReason::Disposed);
        }

        let health_task = self.inner.health_task.lock().take();
        if let Some(task) = health_task {
            if let Err(err) = task.await {
                warn!(error = %err, "health task ended abnormally");
            }
        }
        self.inner.wait_for_background().await;
    }

    fn acquire_timed_out(&self) -> PoolError {
        MetricsTracker::incr(&self.inner.metrics.acquire_timeouts);
        let timeout = self.inner.config.acquire_timeout;
        debug!(?timeout, "timed out waiting for a resource");
        PoolError::AcquireTimeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::manager::FnManager;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct Counters {
        created: AtomicUsize,
        destroyed: AtomicUsize,
    }

    fn counting_manager(
        counters: Arc<Counters>,
    ) -> impl ResourceManager<usize> {
        let on_create = Arc::clone(&counters);
        FnManager::new(
            move || {
                let counters = Arc::clone(&on_create);
                async move { Ok(counters.created.fetch_add(1, Ordering::SeqCst)) }
            },
            move |_value: usize| {
                let counters = Arc::clone(&counters);
                async move {
                    counters.destroyed.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), PoolError>(())
                }
            },
            |_value: usize| async { Ok::<bool, PoolError>(true) },
        )
    }

    fn small_config(min: usize, max: usize) -> PoolConfig {
        PoolConfig::new()
            .with_min_connections(min)
            .with_max_connections(max)
            .with_acquire_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_bootstrap_creates_minimum() {
        let counters = Arc::new(Counters::default());
        let pool = ResourcePool::new(counting_manager(Arc::clone(&counters)), small_config(2, 4))
            .await
            .unwrap();

        let stats = pool.get_stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.active, 0);
        assert_eq!(counters.created.load(Ordering::SeqCst), 2);
        pool.dispose().await;
    }

    #[tokio::test]
    async fn test_release_returns_to_idle() {
        let counters = Arc::new(Counters::default());
        let pool = ResourcePool::new(counting_manager(Arc::clone(&counters)), small_config(1, 2))
            .await
            .unwrap();

        let first_id = {
            let resource = pool.acquire().await.unwrap();
            assert_eq!(pool.get_stats().active, 1);
            resource.id()
        };

        let stats = pool.get_stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.total_released, 1);

        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id(), first_id);
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
        pool.release(again);
        pool.dispose().await;
    }

    #[tokio::test]
    async fn test_creates_up_to_max_then_times_out() {
        let counters = Arc::new(Counters::default());
        let pool = ResourcePool::new(counting_manager(Arc::clone(&counters)), small_config(0, 2))
            .await
            .unwrap();

        let _a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AcquireTimeout);
        assert_eq!(pool.get_stats().acquire_timeouts, 1);
        assert!(pool.try_acquire().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidated_resource_is_destroyed_on_release() {
        let counters = Arc::new(Counters::default());
        let pool = ResourcePool::new(counting_manager(Arc::clone(&counters)), small_config(0, 2))
            .await
            .unwrap();

        let mut resource = pool.acquire().await.unwrap();
        resource.invalidate();
        assert_eq!(pool.get_stats().unhealthy, 1);
        drop(resource);

        pool.dispose().await;
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.get_stats().total, 0);
    }

    #[tokio::test]
    async fn test_detach_frees_the_slot() {
        let counters = Arc::new(Counters::default());
        let pool = ResourcePool::new(counting_manager(Arc::clone(&counters)), small_config(0, 1))
            .await
            .unwrap();

        let resource = pool.acquire().await.unwrap();
        let value = resource.detach();
        assert_eq!(value, Some(0));
        assert_eq!(pool.get_stats().total, 0);

        let next = pool.acquire().await.unwrap();
        assert_eq!(*next, 1);
        drop(next);
        pool.dispose().await;
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_foreign_release_is_destroyed() {
        let counters_a = Arc::new(Counters::default());
        let counters_b = Arc::new(Counters::default());
        let pool_a = ResourcePool::new(counting_manager(Arc::clone(&counters_a)), small_config(0, 1))
            .await
            .unwrap();
        let pool_b = ResourcePool::new(counting_manager(Arc::clone(&counters_b)), small_config(0, 1))
            .await
            .unwrap();

        let resource = pool_a.acquire().await.unwrap();
        pool_b.release(resource);

        pool_b.dispose().await;
        assert_eq!(counters_b.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(pool_a.get_stats().total, 0);
        pool_a.dispose().await;
        assert_eq!(counters_a.destroyed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_acquire_after_dispose_fails() {
        let counters = Arc::new(Counters::default());
        let pool = ResourcePool::new(counting_manager(Arc::clone(&counters)), small_config(2, 2))
            .await
            .unwrap();

        pool.dispose().await;
        assert!(pool.is_disposed());
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 2);
        assert!(matches!(pool.acquire().await, Err(PoolError::PoolDisposing)));
        assert!(matches!(pool.try_acquire().await, Err(PoolError::PoolDisposing)));
    }

    #[tokio::test]
    async fn test_lent_resource_destroyed_after_dispose() {
        let counters = Arc::new(Counters::default());
        let pool = ResourcePool::new(counting_manager(Arc::clone(&counters)), small_config(1, 2))
            .await
            .unwrap();

        let resource = pool.acquire().await.unwrap();
        pool.dispose().await;
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 0);

        drop(resource);
        pool.dispose().await;
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_creation_failure_surfaces_and_frees_slot() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        let manager = FnManager::new(
            move || {
                let seen = Arc::clone(&seen);
                async move {
                    if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(PoolError::network("refused").with_code("ECONNREFUSED"))
                    } else {
                        Ok(1u8)
                    }
                }
            },
            |_value: u8| async { Ok::<(), PoolError>(()) },
            |_value: u8| async { Ok::<bool, PoolError>(true) },
        );
        let pool = ResourcePool::new(manager, small_config(0, 1)).await.unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err.code(), "ECONNREFUSED");
        assert_eq!(pool.get_stats().pending, 0);
        assert!(pool.acquire().await.is_ok());
        assert_eq!(pool.get_stats().creation_failures, 1);
    }

    #[tokio::test]
    async fn test_unbounded_timeouts_do_not_overflow() {
        let counters = Arc::new(Counters::default());
        let config = small_config(1, 1)
            .with_acquire_timeout(Duration::MAX)
            .with_health_check_interval(Duration::MAX);
        let pool = ResourcePool::new(counting_manager(Arc::clone(&counters)), config)
            .await
            .unwrap();

        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        let timer_running = pool
            .inner
            .health_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished());
        assert!(timer_running);

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|r| *r) })
        };
        while pool.get_stats().waiting == 0 {
            tokio::task::yield_now().await;
        }
        drop(held);
        assert_eq!(waiter.await.unwrap().unwrap(), 0);

        pool.dispose().await;
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_dispose_logged_once_without_health_timer() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let counters = Arc::new(Counters::default());
        let pool = ResourcePool::new(counting_manager(Arc::clone(&counters)), small_config(1, 1))
            .await
            .unwrap();
        drop(pool.inner.health_task.lock().take());

        pool.dispose().await;
        pool.dispose().await;

        let output = String::from_utf8(captured.0.lock().clone()).unwrap();
        assert_eq!(output.matches("disposing resource pool").count(), 1);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
    }
}
