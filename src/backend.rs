//! The seam between the proxy manager and a concrete store.
//!
//! A backend executes one "get state / apply transition / persist state" cycle using its
//! store's native concurrency primitive. Backends are picked when the manager is built and
//! are never inspected at runtime.

use crate::config::ClientSideConfig;
use crate::error::{ConfigError, ProxyResult};
use crate::expiration::ExpirationPolicy;
use crate::key::KeyRef;
use crate::timeout::TimeoutGuard;
use crate::transition::Transition;
use async_trait::async_trait;

/// Everything a backend needs to know about the call in progress.
#[derive(Debug, Clone, Copy)]
pub struct CycleContext {
    config: ClientSideConfig,
    expiration: ExpirationPolicy,
    guard: TimeoutGuard,
}

impl CycleContext {
    /// Start a cycle now; the guard's clock starts ticking immediately.
    pub fn new(config: ClientSideConfig, expiration: ExpirationPolicy) -> Self {
        let guard = TimeoutGuard::start(config.request_timeout());
        Self { config, expiration, guard }
    }

    pub fn config(&self) -> &ClientSideConfig {
        &self.config
    }

    pub fn expiration(&self) -> &ExpirationPolicy {
        &self.expiration
    }

    pub fn guard(&self) -> &TimeoutGuard {
        &self.guard
    }
}

/// One store-specific coordination protocol.
///
/// Implementations must guarantee:
/// - concurrent `execute` calls on the same key behave as if serialized;
/// - on every exit path (success, transition failure, store error, timeout, or the future
///   being dropped) any lock or transaction taken for the call is released;
/// - a failed call leaves no partial write behind;
/// - an expired record reads exactly like an absent one.
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &'static str;

    /// Reject an expiration policy this backend cannot honor.
    fn validate(&self, _expiration: &ExpirationPolicy) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Apply `transition` to the state stored under `key` as one coordinated update.
    async fn execute<T>(
        &self,
        key: KeyRef<'_>,
        transition: &T,
        ctx: &CycleContext,
    ) -> ProxyResult<T::Output>
    where
        T: Transition;

    /// Current state under `key` without taking a lock. `None` when absent or expired.
    async fn read(&self, key: KeyRef<'_>, ctx: &CycleContext) -> ProxyResult<Option<Vec<u8>>>;

    /// Delete the state under `key`. Returns whether anything was removed.
    async fn remove(&self, key: KeyRef<'_>, ctx: &CycleContext) -> ProxyResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn context_starts_guard_from_config() {
        let config = ClientSideConfig::new().with_request_timeout(Duration::from_secs(3)).unwrap();
        let ctx = CycleContext::new(config, ExpirationPolicy::none());
        assert_eq!(ctx.guard().timeout(), Some(Duration::from_secs(3)));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(ctx.guard().remaining(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn context_without_timeout_is_unbounded() {
        let ctx = CycleContext::new(ClientSideConfig::default(), ExpirationPolicy::none());
        assert!(ctx.guard().remaining().is_none());
        assert!(ctx.expiration().is_none());
    }
}
