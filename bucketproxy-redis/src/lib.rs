//! Redis compare-and-swap store for `bucketproxy` (companion crate).
//!
//! Bring your own async connection: a `redis::aio::ConnectionManager` for a single node, or a
//! cluster connection. Each compare-and-swap is one Lua script, so the comparison and the
//! write (with its `PX` expiry) happen atomically on the server.
//!
//! ```no_run
//! use bucketproxy::{ExpirationPolicy, KeyMapper};
//! use bucketproxy::testing::increment;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = redis::Client::open("redis://127.0.0.1/")?;
//! let connection = client.get_connection_manager().await?;
//! let manager = bucketproxy_redis::builder_for(connection)
//!     .with_key_mapper(KeyMapper::text().with_prefix("rl:"))
//!     .with_expiration(ExpirationPolicy::fixed_time_to_live(Duration::from_secs(60))?)
//!     .build()?;
//!
//! manager.execute("user:42", &increment(1)).await?;
//! # Ok(())
//! # }
//! ```

mod store;

pub use store::RedisCasStore;

use bucketproxy::{
    CasBackend, ClientSideConfig, ConfigError, ExpirationPolicy, KeyMapper, ProxyManager,
};
use redis::aio::ConnectionLike;
use std::time::Duration;

/// Proxy manager running the compare-and-swap loop against Redis.
pub type RedisProxyManager<C> = ProxyManager<CasBackend<RedisCasStore<C>>>;

/// Start building a [`RedisProxyManager`] over `connection`.
pub fn builder_for<C>(connection: C) -> RedisProxyManagerBuilder<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    RedisProxyManagerBuilder {
        backend: CasBackend::new(RedisCasStore::new(connection)),
        client_side_config: ClientSideConfig::default(),
        expiration: ExpirationPolicy::default(),
    }
}

#[derive(Debug, Clone)]
pub struct RedisProxyManagerBuilder<C> {
    backend: CasBackend<RedisCasStore<C>>,
    client_side_config: ClientSideConfig,
    expiration: ExpirationPolicy,
}

impl<C> RedisProxyManagerBuilder<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    pub fn with_key_mapper(mut self, key_mapper: KeyMapper) -> Self {
        self.backend = self.backend.with_key_mapper(key_mapper);
        self
    }

    pub fn with_expiration(mut self, expiration: ExpirationPolicy) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_client_side_config(mut self, config: ClientSideConfig) -> Self {
        self.client_side_config = config;
        self
    }

    /// Bound the CAS loop for calls without a request timeout.
    pub fn with_convergence_budget(mut self, budget: Duration) -> Self {
        self.backend = self.backend.with_convergence_budget(budget);
        self
    }

    pub fn build(self) -> Result<RedisProxyManager<C>, ConfigError> {
        ProxyManager::builder(self.backend)
            .with_client_side_config(self.client_side_config)
            .with_expiration(self.expiration)
            .build()
    }
}
