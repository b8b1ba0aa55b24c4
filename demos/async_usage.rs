//! Async usage examples: contention, timeouts and disposal

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use resilient_pool::{FnManager, PoolConfig, PoolError, PoolResult, ResourceManager, ResourcePool};
use tokio::time::sleep;

#[tokio::main]
async fn main() -> PoolResult<()> {
    println!("=== resilient-pool - Async Examples ===\n");

    // Example 1: Acquire timeout
    acquire_timeout().await?;

    // Example 2: Waiters are served in order
    fair_hand_off().await?;

    // Example 3: Concurrent access
    concurrent_access().await?;

    // Example 4: Disposal wakes waiters
    dispose_with_waiters().await?;

    Ok(())
}

/// Connections that take a little while to open
fn slow_connections(open_delay: Duration) -> impl ResourceManager<u32> {
    let next = Arc::new(AtomicU32::new(1));
    FnManager::new(
        move || {
            let next = Arc::clone(&next);
            async move {
                sleep(open_delay).await;
                PoolResult::Ok(next.fetch_add(1, Ordering::SeqCst))
            }
        },
        |_conn: u32| async { PoolResult::Ok(()) },
        |_conn: u32| async { PoolResult::Ok(true) },
    )
}

async fn acquire_timeout() -> PoolResult<()> {
    println!("1. Acquire Timeout:");

    let config = PoolConfig::new()
        .with_max_connections(1)
        .with_min_connections(1)
        .with_acquire_timeout(Duration::from_millis(100));
    let pool = ResourcePool::new(slow_connections(Duration::ZERO), config).await?;

    // Take the only connection
    let _conn = pool.acquire().await?;

    // Try to get another (should time out)
    match pool.acquire().await {
        Ok(_) => println!("   Got connection"),
        Err(e) => println!("   Error [{}]: {}", e.code(), e),
    }

    println!();
    pool.dispose().await;
    Ok(())
}

async fn fair_hand_off() -> PoolResult<()> {
    println!("2. FIFO Hand-off:");

    let config = PoolConfig::new()
        .with_max_connections(1)
        .with_min_connections(1)
        .with_acquire_timeout(Duration::from_secs(2));
    let pool = ResourcePool::new(slow_connections(Duration::ZERO), config).await?;
    let held = pool.acquire().await?;

    let mut handles = Vec::new();
    for caller in 0..3 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let conn = pool.acquire().await?;
            println!("   Caller {} got connection {}", caller, *conn);
            sleep(Duration::from_millis(10)).await;
            PoolResult::Ok(())
        }));
        // Let each caller queue up before the next one
        sleep(Duration::from_millis(5)).await;
    }

    drop(held);
    for handle in handles {
        handle
            .await
            .map_err(|e| PoolError::Internal(e.to_string()))??;
    }

    println!();
    pool.dispose().await;
    Ok(())
}

async fn concurrent_access() -> PoolResult<()> {
    println!("3. Concurrent Access:");

    let config = PoolConfig::new()
        .with_max_connections(3)
        .with_min_connections(0);
    let pool = ResourcePool::new(slow_connections(Duration::from_millis(20)), config).await?;

    let mut handles = Vec::new();
    for i in 0..10 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let conn = pool.acquire().await?;
            sleep(Duration::from_millis(10)).await;
            PoolResult::Ok((i, *conn))
        }));
    }

    for handle in handles {
        let (task, conn) = handle
            .await
            .map_err(|e| PoolError::Internal(e.to_string()))??;
        println!("   Task {} used connection {}", task, conn);
    }

    let stats = pool.get_stats();
    println!("   Created {} connections for 10 tasks\n", stats.total_created);
    pool.dispose().await;
    Ok(())
}

async fn dispose_with_waiters() -> PoolResult<()> {
    println!("4. Dispose With Waiters:");

    let config = PoolConfig::new()
        .with_max_connections(1)
        .with_min_connections(1)
        .with_acquire_timeout(Duration::from_secs(5));
    let pool = ResourcePool::new(slow_connections(Duration::ZERO), config).await?;
    let held = pool.acquire().await?;

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|conn| *conn) })
    };
    sleep(Duration::from_millis(10)).await;

    pool.dispose().await;
    match waiter.await {
        Ok(Err(e)) => println!("   Waiter failed with {}", e.code()),
        Ok(Ok(conn)) => println!("   Waiter unexpectedly got {}", conn),
        Err(e) => println!("   Waiter task failed: {}", e),
    }

    // Destroyed on release since the pool is gone
    drop(held);
    pool.dispose().await;
    println!("   Destroyed: {}\n", pool.get_stats().total_destroyed);
    Ok(())
}
