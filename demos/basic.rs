//! Basic usage examples for ResourcePool

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use resilient_pool::{FnManager, PoolConfig, PoolResult, ResourceManager, ResourcePool};

#[tokio::main]
async fn main() -> PoolResult<()> {
    println!("=== resilient-pool - Basic Examples ===\n");

    // Example 1: Simple pool
    simple_pool().await?;

    // Example 2: Pool with configuration
    configured_pool().await?;

    // Example 3: Try acquire
    try_acquire().await?;

    // Example 4: Stats and health
    stats_and_health().await?;

    Ok(())
}

/// Hands out numbered connections
fn numbered_connections() -> impl ResourceManager<u32> {
    let next = Arc::new(AtomicU32::new(1));
    FnManager::new(
        move || {
            let next = Arc::clone(&next);
            async move { PoolResult::Ok(next.fetch_add(1, Ordering::SeqCst)) }
        },
        |_conn: u32| async { PoolResult::Ok(()) },
        |_conn: u32| async { PoolResult::Ok(true) },
    )
}

async fn simple_pool() -> PoolResult<()> {
    println!("1. Simple Pool:");
    let pool = ResourcePool::new(numbered_connections(), PoolConfig::default()).await?;

    {
        let conn = pool.acquire().await?;
        println!("   Got connection: {}", *conn);
        // Connection automatically returned when dropped
    }

    println!("   Idle after return: {}\n", pool.get_stats().idle);
    pool.dispose().await;
    Ok(())
}

async fn configured_pool() -> PoolResult<()> {
    println!("2. Configured Pool:");

    let config = PoolConfig::new()
        .with_max_connections(5)
        .with_min_connections(1)
        .with_acquire_timeout(Duration::from_secs(2))
        .with_idle_timeout(Duration::from_secs(30));

    let pool = ResourcePool::new(numbered_connections(), config).await?;

    let first = pool.acquire().await?;
    let second = pool.acquire().await?;
    println!("   Got connections: {} and {}", *first, *second);
    pool.release(first);
    pool.release(second);

    let stats = pool.get_stats();
    println!("   Total: {}, idle: {}\n", stats.total, stats.idle);
    pool.dispose().await;
    Ok(())
}

async fn try_acquire() -> PoolResult<()> {
    println!("3. Try Acquire:");

    let config = PoolConfig::new()
        .with_max_connections(1)
        .with_min_connections(0);
    let pool = ResourcePool::new(numbered_connections(), config).await?;

    let held = pool.acquire().await?;
    println!("   Holding connection {}", *held);

    match pool.try_acquire().await? {
        Some(conn) => println!("   Unexpectedly got {}", *conn),
        None => println!("   Pool is full, nothing to hand out"),
    }

    drop(held);
    if let Some(conn) = pool.try_acquire().await? {
        println!("   After release got {}\n", *conn);
    }
    pool.dispose().await;
    Ok(())
}

async fn stats_and_health() -> PoolResult<()> {
    println!("4. Stats and Health:");

    let pool = ResourcePool::new(numbered_connections(), PoolConfig::default()).await?;

    {
        let _a = pool.acquire().await?;
        let _b = pool.acquire().await?;

        let stats = pool.get_stats();
        println!("   Active: {}", stats.active);
        println!("   Idle: {}", stats.idle);
        println!("   Utilization: {:.1}%", stats.utilization() * 100.0);
    }

    let health = pool.health_status();
    println!("   Healthy: {}", health.is_healthy());
    println!("   Warnings: {}", health.warning_count);

    let report = pool.run_health_check().await;
    println!("   Sweep checked {} idle resources\n", report.checked);
    pool.dispose().await;
    Ok(())
}
