//! Pool and circuit breaker configuration

use std::time::Duration;

use crate::errors::{PoolError, PoolResult};

/// Configuration for resource pool behavior
///
/// # Examples
///
/// ```
/// use resilient_pool::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::new()
///     .with_max_connections(20)
///     .with_min_connections(4)
///     .with_acquire_timeout(Duration::from_secs(5));
///
/// assert_eq!(config.max_connections, 20);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Hard ceiling on live resources (idle + in use)
    pub max_connections: usize,

    /// Floor maintained by bootstrap and the post-sweep top-up
    pub min_connections: usize,

    /// Maximum time a caller waits behind a full pool
    pub acquire_timeout: Duration,

    /// Idle resources unused for longer than this are destroyed
    pub idle_timeout: Duration,

    /// Resources older than this are destroyed regardless of health
    pub max_lifetime: Duration,

    /// Period between background health sweeps
    pub health_check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(5 * 60),
            max_lifetime: Duration::from_secs(60 * 60),
            health_check_interval: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of live resources
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the number of resources kept warm
    pub fn with_min_connections(mut self, min: usize) -> Self {
        self.min_connections = min;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Check the configuration invariants
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_connections == 0 {
            return Err(PoolError::Configuration(
                "max_connections must be greater than 0".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::Configuration(format!(
                "min_connections ({}) must not exceed max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(PoolError::Configuration(
                "acquire_timeout must be greater than zero".to_string(),
            ));
        }
        if self.health_check_interval.is_zero() {
            return Err(PoolError::Configuration(
                "health_check_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a [`CircuitBreaker`](crate::CircuitBreaker)
///
/// # Examples
///
/// ```
/// use resilient_pool::CircuitBreakerConfig;
/// use std::time::Duration;
///
/// let config = CircuitBreakerConfig::new()
///     .with_failure_threshold(3)
///     .with_recovery_time(Duration::from_secs(10));
///
/// assert_eq!(config.failure_threshold, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: usize,

    /// Cooldown after the last failure before a trial call is allowed
    pub recovery_time: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_time: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_time(mut self, recovery_time: Duration) -> Self {
        self.recovery_time = recovery_time;
        self
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.failure_threshold == 0 {
            return Err(PoolError::Configuration(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.max_lifetime, Duration::from_secs(3600));
        assert_eq!(config.health_check_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_pool_config_validation() {
        assert!(PoolConfig::new().with_max_connections(0).validate().is_err());
        assert!(
            PoolConfig::new()
                .with_min_connections(11)
                .with_max_connections(10)
                .validate()
                .is_err()
        );
        assert!(
            PoolConfig::new()
                .with_acquire_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            PoolConfig::new()
                .with_min_connections(3)
                .with_max_connections(3)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_circuit_breaker_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.recovery_time, Duration::from_secs(60));
        assert!(config.with_failure_threshold(0).validate().is_err());
    }
}
