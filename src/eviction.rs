//! Per-resource bookkeeping and the freshness rules that decide eviction

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::PoolConfig;

/// Opaque identifier assigned to a resource when the pool creates it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res-{}", self.0)
    }
}

/// Where a tracked resource currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResourceStatus {
    /// Sitting in the idle queue, owned by the pool
    Idle,
    /// Lent to exactly one caller
    InUse,
    /// Taken out of the idle queue by a health sweep
    Checking,
}

/// Why a resource was (or must be) destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Older than `max_lifetime`
    Lifetime,
    /// Unused for longer than `idle_timeout`
    Idle,
    /// Failed a health check or was invalidated by its holder
    Unhealthy,
    /// Released after the pool started disposing
    Disposed,
    /// Released to a pool that does not track it
    Untracked,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Lifetime => "max lifetime exceeded",
            Self::Idle => "idle timeout exceeded",
            Self::Unhealthy => "unhealthy",
            Self::Disposed => "pool disposed",
            Self::Untracked => "not tracked by pool",
        };
        f.write_str(reason)
    }
}

/// Age limits applied to pooled resources
#[derive(Debug, Clone, Copy)]
pub(crate) struct EvictionPolicy {
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
}

impl From<&PoolConfig> for EvictionPolicy {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_lifetime: config.max_lifetime,
            idle_timeout: config.idle_timeout,
        }
    }
}

/// Metadata the pool keeps for every live resource
#[derive(Debug, Clone)]
pub(crate) struct ResourceRecord {
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub status: ResourceStatus,
    pub healthy: bool,
}

impl ResourceRecord {
    pub fn new(status: ResourceStatus) -> Self {
        let now = Instant::now();
        Self {
            created_at: now,
            last_used_at: now,
            status,
            healthy: true,
        }
    }

    pub fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }

    pub fn in_use(&self) -> bool {
        self.status == ResourceStatus::InUse
    }

    /// Reason this resource may not be handed out again, if any.
    ///
    /// Idle time only counts while the resource is not lent out.
    pub fn expiry(&self, policy: &EvictionPolicy) -> Option<EvictionReason> {
        if !self.healthy {
            Some(EvictionReason::Unhealthy)
        } else if self.created_at.elapsed() >= policy.max_lifetime {
            Some(EvictionReason::Lifetime)
        } else if !self.in_use() && self.last_used_at.elapsed() >= policy.idle_timeout {
            Some(EvictionReason::Idle)
        } else {
            None
        }
    }
}

/// Stand-in for "never" when a deadline does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + timeout`, saturating to a far-future instant on overflow
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}
