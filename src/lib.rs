//! # resilient-pool
//!
//! Async pool for expensive, stateful resources (database connections,
//! provider sessions, sockets) plus composable resilience primitives for
//! the calls made through them.
//!
//! ## Features
//!
//! - Bounded pool with a hard `max_connections` ceiling and a warm minimum
//! - Fair FIFO hand-off to callers waiting behind a full pool
//! - Automatic return of resources via RAII (Drop trait)
//! - Periodic health checks with idle-timeout and max-lifetime eviction
//! - Graceful disposal that destroys every resource exactly once
//! - Circuit breaker, bounded retry with backoff, and timeout guard
//! - Pool statistics with optional Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use resilient_pool::{FnManager, PoolConfig, PoolResult, ResourcePool};
//!
//! # #[tokio::main]
//! # async fn main() -> PoolResult<()> {
//! let manager = FnManager::new(
//!     || async { PoolResult::Ok(vec![0u8; 16]) },
//!     |_buf: Vec<u8>| async { PoolResult::Ok(()) },
//!     |_buf: Vec<u8>| async { PoolResult::Ok(true) },
//! );
//!
//! let pool = ResourcePool::new(manager, PoolConfig::default()).await?;
//! {
//!     let buf = pool.acquire().await?;
//!     println!("Got buffer of {} bytes", buf.len());
//!     // Resource automatically returned when `buf` goes out of scope
//! }
//! pool.dispose().await;
//! # Ok(())
//! # }
//! ```

mod circuit_breaker;
mod config;
mod errors;
mod eviction;
mod health;
mod manager;
mod metrics;
mod pool;
mod retry;
mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStats, CircuitState};
pub use config::{CircuitBreakerConfig, PoolConfig};
pub use errors::{ErrorKind, PoolError, PoolResult};
pub use eviction::{EvictionReason, ResourceId};
pub use health::{HealthReport, HealthStatus};
pub use manager::{FnManager, ResourceManager};
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::PoolStats;
pub use pool::{PooledResource, ResourcePool};
pub use retry::{Backoff, RetryExecutor, RetryPolicy, with_retry};
pub use timeout::{TimeoutGuard, with_timeout};

/// Re-exported so implementors can write `#[resilient_pool::async_trait]`
pub use async_trait::async_trait;
