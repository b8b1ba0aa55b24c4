// resilient-pool demo binary
// The library lives in lib.rs; run the demos with: cargo run --example basic

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use resilient_pool::{
    CircuitBreaker, FnManager, PoolConfig, PoolResult, ResourcePool, RetryPolicy, TimeoutGuard,
    with_retry,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> PoolResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== resilient-pool ===");
    println!("See demos/ for more usage examples");
    println!("Run: cargo run --example basic");
    println!();

    let next_id = Arc::new(AtomicU32::new(1));
    let manager = FnManager::new(
        move || {
            let next_id = Arc::clone(&next_id);
            async move { PoolResult::Ok(format!("session-{}", next_id.fetch_add(1, Ordering::SeqCst))) }
        },
        |session: String| async move {
            info!(%session, "closing session");
            PoolResult::Ok(())
        },
        |_session: String| async { PoolResult::Ok(true) },
    );

    let config = PoolConfig::new()
        .with_min_connections(2)
        .with_max_connections(4)
        .with_acquire_timeout(Duration::from_secs(2));
    let pool = ResourcePool::new(manager, config).await?;

    let breaker = CircuitBreaker::default();
    let guard = TimeoutGuard::new(Duration::from_secs(1));
    let policy = RetryPolicy::new()
        .with_base_delay(Duration::from_millis(50))
        .retry_on_classified();

    let reply = with_retry(
        || {
            let pool = pool.clone();
            let breaker = breaker.clone();
            async move {
                breaker
                    .execute(|| async move {
                        guard
                            .execute(async move {
                                let session = pool.acquire().await?;
                                PoolResult::Ok(format!("{} says hello", *session))
                            })
                            .await
                    })
                    .await
            }
        },
        policy,
    )
    .await?;

    println!("Quick Demo:");
    println!("  {reply}");
    println!("  Stats: {:?}", pool.get_stats());

    pool.dispose().await;
    Ok(())
}
