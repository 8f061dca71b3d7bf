//! Client-side configuration shared by every backend.

use crate::error::ConfigError;
use std::time::Duration;

/// Immutable per-manager (or per-call) configuration.
///
/// The only knob today is the request timeout bounding one coordination cycle. When unset,
/// each backend falls back to its own wait behavior: lock waits block for as long as the
/// store lets them, and the compare-and-swap loop runs until its convergence budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "json", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientSideConfig {
    #[cfg_attr(feature = "json", serde(default))]
    request_timeout: Option<Duration>,
}

impl ClientSideConfig {
    /// Configuration with no request timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound each coordination cycle by `timeout`. Rejects a zero duration.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::ZeroRequestTimeout);
        }
        self.request_timeout = Some(timeout);
        Ok(self)
    }

    pub fn without_request_timeout(mut self) -> Self {
        self.request_timeout = None;
        self
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Effective configuration for one call: settings present on `call` win, the rest come
    /// from `self`.
    pub fn resolve(&self, call: Option<&ClientSideConfig>) -> ClientSideConfig {
        match call {
            Some(call) => ClientSideConfig {
                request_timeout: call.request_timeout.or(self.request_timeout),
            },
            None => *self,
        }
    }
}
