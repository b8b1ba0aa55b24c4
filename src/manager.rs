//! Lifecycle callbacks the pool uses to create, destroy and check resources

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::errors::PoolResult;

/// The three operations a pool needs from the resource it manages.
///
/// The pool never inspects the resource itself; everything it knows about
/// a resource comes from these calls.
#[async_trait]
pub trait ResourceManager<T>: Send + Sync + 'static
where
    T: Send + Sync + 'static,
{
    /// Produce a ready-to-use resource
    async fn create(&self) -> PoolResult<T>;

    /// Tear a resource down. Must tolerate resources that are already
    /// broken; failures are logged by the pool and otherwise ignored.
    async fn destroy(&self, resource: T) -> PoolResult<()>;

    /// Check a resource without changing its usable state. An error counts
    /// as unhealthy.
    async fn health_check(&self, resource: &T) -> PoolResult<bool>;
}

/// A [`ResourceManager`] assembled from three async closures
///
/// Only implements [`ResourceManager`] for `T: Clone`. The health-check
/// closure returns a `'static` future, so it is handed a clone of the
/// pooled resource rather than a borrow, and whatever it observes or
/// changes happens on that clone. Use a shared handle such as
/// `Arc<Connection>` when the check must see the pooled instance, or
/// implement [`ResourceManager`] directly for resources that cannot be
/// cloned.
///
/// # Examples
///
/// ```
/// use resilient_pool::{FnManager, PoolResult};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// // The pooled value and the clone given to the health check share one flag
/// let manager = FnManager::new(
///     || async { PoolResult::Ok(Arc::new(AtomicBool::new(true))) },
///     |_conn: Arc<AtomicBool>| async { PoolResult::Ok(()) },
///     |conn: Arc<AtomicBool>| async move { PoolResult::Ok(conn.load(Ordering::SeqCst)) },
/// );
/// # let _ = manager;
/// ```
pub struct FnManager<T, C, D, H> {
    create: C,
    destroy: D,
    health_check: H,
    _resource: PhantomData<fn() -> T>,
}

impl<T, C, D, H> FnManager<T, C, D, H> {
    pub fn new<CF>(create: C, destroy: D, health_check: H) -> Self
    where
        C: Fn() -> CF,
        CF: Future<Output = PoolResult<T>>,
    {
        Self {
            create,
            destroy,
            health_check,
            _resource: PhantomData,
        }
    }
}

#[async_trait]
impl<T, C, CF, D, DF, H, HF> ResourceManager<T> for FnManager<T, C, D, H>
where
    T: Clone + Send + Sync + 'static,
    C: Fn() -> CF + Send + Sync + 'static,
    CF: Future<Output = PoolResult<T>> + Send + 'static,
    D: Fn(T) -> DF + Send + Sync + 'static,
    DF: Future<Output = PoolResult<()>> + Send + 'static,
    H: Fn(T) -> HF + Send + Sync + 'static,
    HF: Future<Output = PoolResult<bool>> + Send + 'static,
{
    async fn create(&self) -> PoolResult<T> {
        (self.create)().await
    }

    async fn destroy(&self, resource: T) -> PoolResult<()> {
        (self.destroy)(resource).await
    }

    async fn health_check(&self, resource: &T) -> PoolResult<bool> {
        (self.health_check)(resource.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PoolError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fn_manager_delegates() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&destroyed);

        let manager = FnManager::new(
            || async { Ok(7u32) },
            move |_value: u32| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), PoolError>(())
                }
            },
            |value: u32| async move {
                if value == 0 {
                    Err(PoolError::network("check failed"))
                } else {
                    Ok(true)
                }
            },
        );

        let value = manager.create().await.unwrap();
        assert_eq!(value, 7);
        assert!(manager.health_check(&value).await.unwrap());
        assert!(manager.health_check(&0).await.is_err());
        manager.destroy(value).await.unwrap();
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_health_check_sees_clone_of_resource() {
        let manager = FnManager::new(
            || async { Ok::<_, PoolError>(Arc::new(AtomicUsize::new(0))) },
            |_value: Arc<AtomicUsize>| async { Ok::<(), PoolError>(()) },
            |value: Arc<AtomicUsize>| async move {
                value.fetch_add(1, Ordering::SeqCst);
                Ok::<bool, PoolError>(Arc::strong_count(&value) > 1)
            },
        );

        let pooled = manager.create().await.unwrap();
        assert!(manager.health_check(&pooled).await.unwrap());
        assert!(manager.health_check(&pooled).await.unwrap());
        // Both checks ran against clones that share the pooled counter
        assert_eq!(pooled.load(Ordering::SeqCst), 2);
        assert_eq!(Arc::strong_count(&pooled), 1);
    }
}
