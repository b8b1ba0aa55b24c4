//! Advanced features: custom managers, eviction, resilience primitives

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use resilient_pool::{
    Backoff, CircuitBreaker, CircuitBreakerConfig, MetricsExporter, PoolConfig, PoolError,
    PoolResult, ResourceManager, ResourcePool, RetryExecutor, RetryPolicy, TimeoutGuard,
    async_trait,
};
use tokio::time::sleep;

#[derive(Debug)]
struct Connection {
    id: usize,
    alive: AtomicBool,
}

/// Opens fake connections against a backend that can be switched off
struct Backend {
    next_id: AtomicUsize,
    online: Arc<AtomicBool>,
}

#[async_trait]
impl ResourceManager<Connection> for Backend {
    async fn create(&self) -> PoolResult<Connection> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(PoolError::network("backend unreachable").with_code("ECONNREFUSED"));
        }
        Ok(Connection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            alive: AtomicBool::new(true),
        })
    }

    async fn destroy(&self, conn: Connection) -> PoolResult<()> {
        println!("   Closing connection {}", conn.id);
        Ok(())
    }

    async fn health_check(&self, conn: &Connection) -> PoolResult<bool> {
        Ok(conn.alive.load(Ordering::SeqCst))
    }
}

fn backend(online: &Arc<AtomicBool>) -> Backend {
    Backend {
        next_id: AtomicUsize::new(1),
        online: Arc::clone(online),
    }
}

#[tokio::main]
async fn main() -> PoolResult<()> {
    println!("=== resilient-pool - Advanced Features ===\n");

    // Example 1: Health sweep and eviction
    eviction_and_health().await?;

    // Example 2: Circuit breaker
    circuit_breaker_demo().await?;

    // Example 3: Retry and timeout
    retry_and_timeout().await?;

    // Example 4: Prometheus metrics
    prometheus_export().await?;

    Ok(())
}

async fn eviction_and_health() -> PoolResult<()> {
    println!("1. Health Sweep and Eviction:");

    let online = Arc::new(AtomicBool::new(true));
    let config = PoolConfig::new()
        .with_min_connections(2)
        .with_max_connections(4)
        .with_idle_timeout(Duration::from_millis(100))
        .with_health_check_interval(Duration::from_secs(60));
    let pool = ResourcePool::new(backend(&online), config).await?;

    {
        let conn = pool.acquire().await?;
        // Breaks while lent out; the next sweep catches it
        conn.alive.store(false, Ordering::SeqCst);
    }
    let report = pool.run_health_check().await;
    println!(
        "   Checked {}, unhealthy {}, recreated {}",
        report.checked, report.unhealthy, report.created
    );

    sleep(Duration::from_millis(150)).await;
    let report = pool.run_health_check().await;
    println!(
        "   After idle timeout: expired {}, recreated {}",
        report.expired, report.created
    );

    println!();
    pool.dispose().await;
    Ok(())
}

async fn circuit_breaker_demo() -> PoolResult<()> {
    println!("2. Circuit Breaker:");

    let online = Arc::new(AtomicBool::new(false));
    let config = PoolConfig::new()
        .with_min_connections(0)
        .with_max_connections(2);
    let pool = ResourcePool::new(backend(&online), config).await?;
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::new()
            .with_failure_threshold(3)
            .with_recovery_time(Duration::from_millis(200)),
    )?;

    println!("   Backend is down...");
    for attempt in 1..=5 {
        let result = breaker
            .execute(|| async { pool.acquire().await.map(|conn| conn.id) })
            .await;
        match result {
            Ok(id) => println!("   Attempt {}: connection {}", attempt, id),
            Err(e) => println!("   Attempt {}: {} ({})", attempt, e.code(), breaker.state()),
        }
    }

    online.store(true, Ordering::SeqCst);
    sleep(Duration::from_millis(250)).await;
    let id = breaker
        .execute(|| async { pool.acquire().await.map(|conn| conn.id) })
        .await?;
    println!("   Backend is back: connection {} ({})", id, breaker.state());

    println!();
    pool.dispose().await;
    Ok(())
}

async fn retry_and_timeout() -> PoolResult<()> {
    println!("3. Retry and Timeout:");

    let calls = Arc::new(AtomicUsize::new(0));
    let executor = RetryExecutor::new(
        RetryPolicy::new()
            .with_max_attempts(4)
            .with_base_delay(Duration::from_millis(20))
            .with_backoff(Backoff::Linear)
            .with_retryable_codes(["TIMEOUT"]),
    )
    .on_retry(|attempt, err| println!("   Attempt {} failed: {}", attempt, err));

    let guard = TimeoutGuard::new(Duration::from_millis(50));
    let answer = executor
        .execute(|| {
            let calls = Arc::clone(&calls);
            guard.execute(async move {
                // Only the third call is fast enough
                let n = calls.fetch_add(1, Ordering::SeqCst);
                let delay = if n < 2 { 200 } else { 5 };
                sleep(Duration::from_millis(delay)).await;
                PoolResult::Ok(42)
            })
        })
        .await?;
    println!("   Answer {} after {} calls\n", answer, calls.load(Ordering::SeqCst));
    Ok(())
}

async fn prometheus_export() -> PoolResult<()> {
    println!("4. Prometheus Metrics Export:");

    let online = Arc::new(AtomicBool::new(true));
    let pool = ResourcePool::new(backend(&online), PoolConfig::default()).await?;

    // Use some connections
    {
        let _conn1 = pool.acquire().await?;
        let _conn2 = pool.acquire().await?;

        let mut tags = HashMap::new();
        tags.insert("service".to_string(), "example".to_string());
        tags.insert("env".to_string(), "dev".to_string());

        let prometheus_text =
            MetricsExporter::export_prometheus(&pool.get_stats(), "example_pool", Some(&tags))?;
        println!("{}", prometheus_text);
    }

    pool.dispose().await;
    Ok(())
}
