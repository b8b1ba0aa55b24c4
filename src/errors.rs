//! Error types for the resource pool and its resilience primitives

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Classification shared by every error this crate surfaces.
///
/// Retry policies match against [`ErrorKind::as_str`] as well as explicit
/// error codes, so the strings are part of the public contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    Validation,
    Configuration,
    Storage,
    Network,
    Authentication,
    Authorization,
    NotFound,
    Timeout,
    CircuitOpen,
    PoolDisposing,
    AcquireTimeout,
    /// Failures of the crate's own machinery (panicked tasks, encoders).
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::Configuration => "CONFIGURATION",
            Self::Storage => "STORAGE",
            Self::Network => "NETWORK",
            Self::Authentication => "AUTHENTICATION",
            Self::Authorization => "AUTHORIZATION",
            Self::NotFound => "NOT_FOUND",
            Self::Timeout => "TIMEOUT",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::PoolDisposing => "POOL_DISPOSING",
            Self::AcquireTimeout => "ACQUIRE_TIMEOUT",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the pool, the resource callbacks and the
/// resilience primitives.
///
/// # Examples
///
/// ```
/// use resilient_pool::{ErrorKind, PoolError};
///
/// let err = PoolError::storage("write failed")
///     .with_code("STORAGE_OPERATION_FAILED")
///     .with_detail("operation", "insert");
///
/// assert_eq!(err.kind(), ErrorKind::Storage);
/// assert_eq!(err.code(), "STORAGE_OPERATION_FAILED");
/// assert_eq!(err.details()["operation"], "insert");
/// ```
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Timed out after {0:?} waiting for a pooled resource")]
    AcquireTimeout(Duration),

    #[error("Pool is disposing - no further acquisitions accepted")]
    PoolDisposing,

    #[error("Circuit breaker is open - call rejected")]
    CircuitOpen { retry_after: Option<Duration> },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("{kind} error: {message}")]
    Resource {
        kind: ErrorKind,
        code: Option<String>,
        message: String,
        details: BTreeMap<String, String>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PoolError {
    /// Build a resource error of the given kind
    pub fn resource(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Resource {
            kind,
            code: None,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::resource(ErrorKind::Storage, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::resource(ErrorKind::Network, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::resource(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::resource(ErrorKind::NotFound, message)
    }

    /// Attach a machine-readable code. Only resource errors carry custom
    /// codes; other variants are returned unchanged.
    pub fn with_code(mut self, new_code: impl Into<String>) -> Self {
        if let Self::Resource { code, .. } = &mut self {
            *code = Some(new_code.into());
        }
        self
    }

    /// Attach a structured detail to a resource error
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Self::Resource { details, .. } = &mut self {
            details.insert(key.into(), value.into());
        }
        self
    }

    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AcquireTimeout(_) => ErrorKind::AcquireTimeout,
            Self::PoolDisposing => ErrorKind::PoolDisposing,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Resource { kind, .. } => *kind,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Explicit code if one was attached, otherwise the kind name
    pub fn code(&self) -> &str {
        match self {
            Self::Resource {
                code: Some(code), ..
            } => code,
            _ => self.kind().as_str(),
        }
    }

    /// Structured details. Empty for everything but resource errors.
    pub fn details(&self) -> BTreeMap<String, String> {
        match self {
            Self::Resource { details, .. } => details.clone(),
            Self::AcquireTimeout(waited) | Self::Timeout(waited) => {
                BTreeMap::from([("elapsed_ms".to_string(), waited.as_millis().to_string())])
            }
            _ => BTreeMap::new(),
        }
    }

    /// Whether a caller-classified retry should try again after this error.
    ///
    /// Fast-fail and caller-bug kinds are excluded.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::CircuitOpen
                | ErrorKind::PoolDisposing
                | ErrorKind::Configuration
                | ErrorKind::Validation
                | ErrorKind::Authentication
                | ErrorKind::Authorization
                | ErrorKind::NotFound
        )
    }

    /// True when `codes` names either this error's code or its kind
    pub fn matches_any<S: AsRef<str>>(&self, codes: &[S]) -> bool {
        let kind = self.kind().as_str();
        let code = self.code();
        codes
            .iter()
            .any(|c| c.as_ref() == code || c.as_ref() == kind)
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_falls_back_to_kind() {
        assert_eq!(PoolError::PoolDisposing.code(), "POOL_DISPOSING");
        assert_eq!(PoolError::network("reset").code(), "NETWORK");
        assert_eq!(
            PoolError::network("reset").with_code("ECONNRESET").code(),
            "ECONNRESET"
        );
    }

    #[test]
    fn test_with_code_ignored_on_builtin_variants() {
        let err = PoolError::Timeout(Duration::from_millis(5)).with_code("X");
        assert_eq!(err.code(), "TIMEOUT");
        assert_eq!(err.details()["elapsed_ms"], "5");
    }

    #[test]
    fn test_matches_any_by_kind_or_code() {
        let err = PoolError::storage("disk").with_code("STORAGE_OPERATION_FAILED");
        assert!(err.matches_any(&["STORAGE_OPERATION_FAILED"]));
        assert!(err.matches_any(&["STORAGE"]));
        assert!(!err.matches_any(&["NETWORK"]));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PoolError::network("flaky").is_retryable());
        assert!(PoolError::AcquireTimeout(Duration::from_secs(1)).is_retryable());
        assert!(!PoolError::CircuitOpen { retry_after: None }.is_retryable());
        assert!(!PoolError::PoolDisposing.is_retryable());
        assert!(!PoolError::validation("bad").is_retryable());
    }

    #[test]
    fn test_display() {
        let err = PoolError::storage("write failed");
        assert_eq!(err.to_string(), "STORAGE error: write failed");
    }
}
