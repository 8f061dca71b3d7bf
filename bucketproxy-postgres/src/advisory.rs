//! Coordination through transaction-scoped advisory locks.
//!
//! One cycle runs inside one transaction:
//!
//! ```text
//! BEGIN
//! set_config('lock_timeout', <remaining>, true)   -- only with a request timeout
//! pg_advisory_xact_lock(<lock id>)                -- blocks while another cycle holds it
//! SELECT state ...                                -- plain read, the lock serializes writers
//! <transition>
//! INSERT ... ON CONFLICT DO UPDATE
//! COMMIT                                           -- releases the lock
//! ```
//!
//! The lock is released when the transaction ends, however it ends: commit, rollback after
//! an error, or the transaction being dropped when the timeout guard abandons the cycle. No
//! retry loop is needed, so the transition runs exactly once per call.

use crate::settings::SqlProxyConfiguration;
use crate::sql::{self, apply_lock_timeout, bind_key, classify, Stored};
use async_trait::async_trait;
use bucketproxy::{
    Backend, ConfigError, CycleContext, ExpirationPolicy, KeyRef, ProxyError, ProxyResult,
    Transition,
};

#[derive(Debug, Clone)]
pub struct AdvisoryLockBackend {
    config: SqlProxyConfiguration,
}

impl AdvisoryLockBackend {
    pub fn new(config: SqlProxyConfiguration) -> Self {
        Self { config }
    }

    pub fn configuration(&self) -> &SqlProxyConfiguration {
        &self.config
    }

    /// Delete up to `batch_size` expired rows.
    ///
    /// Advisory cycles hold no row lock, so a sweep may delete a row a cycle has just read as
    /// expired. The cycle's upsert then re-creates the row.
    pub async fn remove_expired(&self, batch_size: i64) -> ProxyResult<u64> {
        sql::remove_expired(&self.config, batch_size).await
    }
}

#[async_trait]
impl Backend for AdvisoryLockBackend {
    fn name(&self) -> &'static str {
        "postgres-advisory-lock"
    }

    fn validate(&self, expiration: &ExpirationPolicy) -> Result<(), ConfigError> {
        sql::validate_expiration(&self.config, expiration)
    }

    async fn execute<T>(
        &self,
        key: KeyRef<'_>,
        transition: &T,
        ctx: &CycleContext,
    ) -> ProxyResult<T::Output>
    where
        T: Transition,
    {
        self.config.check_key(key)?;
        let guard = ctx.guard();
        let queries = self.config.queries();
        let lock_id = key.advisory_lock_id();

        let mut tx = self.config.pool().begin().await.map_err(|e| classify(e, guard))?;
        apply_lock_timeout(&mut tx, guard).await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(lock_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify(e, guard))?;
        tracing::debug!(
            target: "bucketproxy::postgres",
            lock_id,
            waited_ms = guard.elapsed().as_millis() as u64,
            "advisory lock acquired"
        );

        let row = bind_key(sqlx::query(&queries.select), key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| classify(e, guard))?;
        let stored = Stored::from_row(row).map_err(|e| classify(e, guard))?;

        // Dropping `tx` on any early return rolls back and releases the lock.
        let (state, output) = transition
            .apply(stored.state.as_deref())
            .map_err(ProxyError::TransitionFailed)?
            .into_parts();

        if let Some(state) = state {
            queries
                .write(key, state, ctx.expiration())
                .execute(&mut *tx)
                .await
                .map_err(|e| classify(e, guard))?;
        }
        tx.commit().await.map_err(|e| classify(e, guard))?;
        Ok(output)
    }

    async fn read(&self, key: KeyRef<'_>, ctx: &CycleContext) -> ProxyResult<Option<Vec<u8>>> {
        sql::read_state(&self.config, key, ctx).await
    }

    async fn remove(&self, key: KeyRef<'_>, ctx: &CycleContext) -> ProxyResult<bool> {
        sql::delete_state(&self.config, key, ctx).await
    }
}
