//! The proxy manager: the single entry point applications use.
//!
//! A manager owns one backend, a default [`ClientSideConfig`], and the [`ExpirationPolicy`]
//! applied to every key it manages. Each call resolves the effective configuration, starts a
//! timeout guard, and delegates one coordination cycle to the backend. Backend outcomes are
//! returned unchanged.
//!
//! ```rust
//! use bucketproxy::{CasBackend, ClientSideConfig, InMemoryCasStore, ProxyManager};
//! use bucketproxy::testing::increment;
//! use std::time::Duration;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let manager = ProxyManager::builder(CasBackend::new(InMemoryCasStore::new()))
//!     .with_client_side_config(
//!         ClientSideConfig::new().with_request_timeout(Duration::from_secs(3)).unwrap(),
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(manager.execute("user:42", &increment(1)).await.unwrap(), 1);
//! assert_eq!(manager.execute("user:42", &increment(1)).await.unwrap(), 2);
//! # });
//! ```

use crate::backend::{Backend, CycleContext};
use crate::config::ClientSideConfig;
use crate::error::{ConfigError, ProxyResult};
use crate::expiration::ExpirationPolicy;
use crate::key::BucketKey;
use crate::transition::Transition;
use tracing::Instrument;

#[derive(Debug, Clone)]
pub struct ProxyManager<B> {
    backend: B,
    client_side_config: ClientSideConfig,
    expiration: ExpirationPolicy,
}

impl<B: Backend> ProxyManager<B> {
    /// Manager with no request timeout and no expiration.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            client_side_config: ClientSideConfig::default(),
            expiration: ExpirationPolicy::default(),
        }
    }

    pub fn builder(backend: B) -> ProxyManagerBuilder<B> {
        ProxyManagerBuilder::new(backend)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn client_side_config(&self) -> &ClientSideConfig {
        &self.client_side_config
    }

    pub fn expiration(&self) -> &ExpirationPolicy {
        &self.expiration
    }

    /// Apply `transition` to the state under `key` as one coordinated update.
    pub async fn execute<K, T>(&self, key: &K, transition: &T) -> ProxyResult<T::Output>
    where
        K: BucketKey + ?Sized,
        T: Transition,
    {
        self.execute_inner(key, transition, None).await
    }

    /// Like [`execute`](Self::execute), with settings in `config` overriding the manager's.
    pub async fn execute_with<K, T>(
        &self,
        key: &K,
        transition: &T,
        config: &ClientSideConfig,
    ) -> ProxyResult<T::Output>
    where
        K: BucketKey + ?Sized,
        T: Transition,
    {
        self.execute_inner(key, transition, Some(config)).await
    }

    /// Stored state under `key`, or `None` if it was never written, was removed, or expired.
    pub async fn read<K>(&self, key: &K) -> ProxyResult<Option<Vec<u8>>>
    where
        K: BucketKey + ?Sized,
    {
        let ctx = self.context(None);
        let key = key.key_ref();
        ctx.guard().run(self.backend.read(key, &ctx)).await
    }

    /// Delete the state under `key`. Returns whether anything was removed.
    pub async fn remove<K>(&self, key: &K) -> ProxyResult<bool>
    where
        K: BucketKey + ?Sized,
    {
        let ctx = self.context(None);
        let key = key.key_ref();
        let removed = ctx.guard().run(self.backend.remove(key, &ctx)).await?;
        tracing::debug!(target: "bucketproxy::manager", key = %key, removed, "remove");
        Ok(removed)
    }

    fn context(&self, call: Option<&ClientSideConfig>) -> CycleContext {
        CycleContext::new(self.client_side_config.resolve(call), self.expiration)
    }

    async fn execute_inner<K, T>(
        &self,
        key: &K,
        transition: &T,
        call: Option<&ClientSideConfig>,
    ) -> ProxyResult<T::Output>
    where
        K: BucketKey + ?Sized,
        T: Transition,
    {
        let ctx = self.context(call);
        let key = key.key_ref();
        let span = tracing::debug_span!(
            target: "bucketproxy::manager",
            "execute",
            backend = self.backend.name(),
            key = %key,
            timeout_ms = ctx.guard().timeout().map(|t| t.as_millis() as u64),
        );
        let result = ctx
            .guard()
            .run(self.backend.execute(key, transition, &ctx))
            .instrument(span.clone())
            .await;
        if let Err(err) = &result {
            span.in_scope(|| {
                tracing::debug!(
                    target: "bucketproxy::manager",
                    error = %err,
                    retryable = err.is_retryable(),
                    "coordination failed"
                )
            });
        }
        result
    }
}

/// Builder for [`ProxyManager`]; `build` checks the backend can honor the configuration.
#[derive(Debug, Clone)]
pub struct ProxyManagerBuilder<B> {
    backend: B,
    client_side_config: ClientSideConfig,
    expiration: ExpirationPolicy,
}

impl<B: Backend> ProxyManagerBuilder<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            client_side_config: ClientSideConfig::default(),
            expiration: ExpirationPolicy::default(),
        }
    }

    pub fn with_client_side_config(mut self, config: ClientSideConfig) -> Self {
        self.client_side_config = config;
        self
    }

    pub fn with_expiration(mut self, expiration: ExpirationPolicy) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn build(self) -> Result<ProxyManager<B>, ConfigError> {
        self.backend.validate(&self.expiration)?;
        Ok(ProxyManager {
            backend: self.backend,
            client_side_config: self.client_side_config,
            expiration: self.expiration,
        })
    }
}
