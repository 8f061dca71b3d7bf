//! Error types for coordinated bucket updates
use std::time::Duration;

/// Boxed error carried by transition and driver failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Classified failure of one coordination cycle.
///
/// Callers can tell "try again" outcomes ([`is_retryable`](Self::is_retryable)) from fatal
/// ones without inspecting driver errors.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The lock wait, CAS loop, or round trip did not finish within the request timeout.
    #[error("coordination timed out after {elapsed:?} (limit: {timeout:?})")]
    Timeout { elapsed: Duration, timeout: Duration },
    /// Conflicting writers kept winning until the retry budget ran out.
    #[error("conflict not resolved after {attempts} attempts in {elapsed:?}")]
    ConflictExhausted { attempts: usize, elapsed: Duration },
    /// A single attempt lost a race; adapters retry this internally.
    #[error("concurrent update conflict: {0}")]
    Conflict(String),
    /// Connectivity or driver-level failure, surfaced verbatim.
    #[error("{backend} store unavailable: {source}")]
    StoreUnavailable {
        backend: &'static str,
        #[source]
        source: BoxError,
    },
    /// The caller-supplied transition returned an error. Nothing was written.
    #[error("state transition failed: {0}")]
    TransitionFailed(#[source] BoxError),
    /// The key cannot be addressed by the configured backend.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl ProxyError {
    /// Wrap a driver error as [`ProxyError::StoreUnavailable`].
    pub fn unavailable<E>(backend: &'static str, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        ProxyError::StoreUnavailable { backend, source: source.into() }
    }

    /// Check if this error is due to timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if contention exhausted the retry budget
    pub fn is_conflict_exhausted(&self) -> bool {
        matches!(self, Self::ConflictExhausted { .. })
    }

    /// Check if this is a single-attempt conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Check if the store could not be reached
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    /// Check if the transition function failed
    pub fn is_transition_failure(&self) -> bool {
        matches!(self, Self::TransitionFailed(_))
    }

    /// Whether repeating the same call later may succeed without any change on the caller side.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ConflictExhausted { .. } | Self::Conflict(_))
    }

    /// Access timeout details as `(elapsed, timeout)`.
    pub fn timeout_details(&self) -> Option<(Duration, Duration)> {
        match self {
            Self::Timeout { elapsed, timeout } => Some((*elapsed, *timeout)),
            _ => None,
        }
    }

    /// Access the number of attempts made before conflicts were given up on.
    pub fn conflict_attempts(&self) -> Option<usize> {
        match self {
            Self::ConflictExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

/// Rejected configuration, reported when a builder or constructor validates its input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("request timeout must be greater than zero")]
    ZeroRequestTimeout,
    #[error("time-to-live must be greater than zero")]
    ZeroTimeToLive,
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
    #[error("backoff max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),
    #[error("{0}")]
    Unsupported(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn timeout_error_display() {
        let err =
            ProxyError::Timeout { elapsed: Duration::from_millis(3100), timeout: Duration::from_secs(3) };
        let msg = err.to_string();
        assert!(msg.contains("timed out"));
        assert!(msg.contains("3.1"));
    }

    #[test]
    fn store_unavailable_keeps_source() {
        let err = ProxyError::unavailable("redis", io::Error::new(io::ErrorKind::Other, "refused"));
        assert!(err.is_store_unavailable());
        assert!(err.to_string().starts_with("redis store unavailable"));
        assert_eq!(err.source().map(|s| s.to_string()), Some("refused".to_string()));
    }

    #[test]
    fn retryable_classification() {
        let timeout = ProxyError::Timeout { elapsed: Duration::ZERO, timeout: Duration::ZERO };
        let exhausted =
            ProxyError::ConflictExhausted { attempts: 4, elapsed: Duration::from_millis(5) };
        let transition = ProxyError::TransitionFailed("boom".into());
        let key = ProxyError::InvalidKey("wrong kind".into());

        assert!(timeout.is_retryable());
        assert!(exhausted.is_retryable());
        assert!(ProxyError::Conflict("lost race".into()).is_retryable());
        assert!(!transition.is_retryable());
        assert!(!key.is_retryable());
        assert!(!ProxyError::unavailable("postgres", "down").is_retryable());
    }

    #[test]
    fn accessors_return_expected_data() {
        let timeout =
            ProxyError::Timeout { elapsed: Duration::from_millis(10), timeout: Duration::from_millis(20) };
        assert_eq!(
            timeout.timeout_details(),
            Some((Duration::from_millis(10), Duration::from_millis(20)))
        );
        assert!(timeout.conflict_attempts().is_none());

        let exhausted = ProxyError::ConflictExhausted { attempts: 7, elapsed: Duration::ZERO };
        assert_eq!(exhausted.conflict_attempts(), Some(7));
        assert!(exhausted.is_conflict_exhausted());
        assert!(!exhausted.is_conflict());
    }

    #[test]
    fn transition_failure_exposes_cause() {
        let err = ProxyError::TransitionFailed("negative balance".into());
        assert!(err.is_transition_failure());
        assert_eq!(err.source().map(|s| s.to_string()), Some("negative balance".to_string()));
    }

    #[test]
    fn config_error_messages() {
        assert_eq!(
            ConfigError::InvalidMaxAttempts(0).to_string(),
            "max_attempts must be > 0 (got 0)"
        );
        assert!(ConfigError::InvalidIdentifier("a;b".into()).to_string().contains("a;b"));
    }
}
