//! Coordination through row locks taken by `SELECT ... FOR UPDATE`.
//!
//! Each attempt runs in its own transaction. A key without a row gets a placeholder row
//! (`state` NULL) inserted with `ON CONFLICT DO NOTHING` so there is something to lock; racing
//! first writers queue on that insert instead of failing. Serialization failures and detected
//! deadlocks roll the attempt back and are retried through the configured [`RetryPolicy`], so
//! the transition may run more than once per call.

use crate::settings::SqlProxyConfiguration;
use crate::sql::{self, apply_lock_timeout, bind_key, classify, Stored};
use async_trait::async_trait;
use bucketproxy::{
    Backend, ConfigError, CycleContext, ExpirationPolicy, KeyRef, ProxyError, ProxyResult,
    RetryPolicy, Transition,
};

#[derive(Debug, Clone)]
pub struct SelectForUpdateBackend {
    config: SqlProxyConfiguration,
    retry: RetryPolicy,
}

impl SelectForUpdateBackend {
    /// Backend retrying conflicts with the default policy (5 attempts).
    pub fn new(config: SqlProxyConfiguration) -> Self {
        Self { config, retry: RetryPolicy::default() }
    }

    /// Bound conflict retries by attempts, elapsed time, or both.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn configuration(&self) -> &SqlProxyConfiguration {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Delete up to `batch_size` expired rows, skipping rows locked by running cycles.
    pub async fn remove_expired(&self, batch_size: i64) -> ProxyResult<u64> {
        sql::remove_expired(&self.config, batch_size).await
    }

    async fn attempt<T>(
        &self,
        key: KeyRef<'_>,
        transition: &T,
        ctx: &CycleContext,
    ) -> ProxyResult<T::Output>
    where
        T: Transition,
    {
        let guard = ctx.guard();
        let queries = self.config.queries();

        let mut tx = self.config.pool().begin().await.map_err(|e| classify(e, guard))?;
        apply_lock_timeout(&mut tx, guard).await?;

        let mut row = bind_key(sqlx::query(&queries.select_for_update), key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| classify(e, guard))?;
        if row.is_none() {
            bind_key(sqlx::query(&queries.insert_placeholder), key)
                .execute(&mut *tx)
                .await
                .map_err(|e| classify(e, guard))?;
            row = bind_key(sqlx::query(&queries.select_for_update), key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| classify(e, guard))?;
        }
        let stored = Stored::from_row(row).map_err(|e| classify(e, guard))?;
        if !stored.exists {
            return Err(ProxyError::Conflict("row vanished before it could be locked".into()));
        }

        let (state, output) = transition
            .apply(stored.state.as_deref())
            .map_err(ProxyError::TransitionFailed)?
            .into_parts();

        match state {
            Some(state) => {
                queries
                    .write(key, state, ctx.expiration())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| classify(e, guard))?;
                tx.commit().await.map_err(|e| classify(e, guard))?;
            }
            // Nothing to persist; rolling back also discards a placeholder inserted above.
            None => tx.rollback().await.map_err(|e| classify(e, guard))?,
        }
        Ok(output)
    }
}

#[async_trait]
impl Backend for SelectForUpdateBackend {
    fn name(&self) -> &'static str {
        "postgres-select-for-update"
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
        self.retry
            .execute(|attempt| {
                if attempt > 0 {
                    tracing::debug!(
                        target: "bucketproxy::postgres",
                        attempt,
                        key = %key,
                        "retrying row-lock cycle"
                    );
                }
                self.attempt(key, transition, ctx)
            })
            .await
    }

    async fn read(&self, key: KeyRef<'_>, ctx: &CycleContext) -> ProxyResult<Option<Vec<u8>>> {
        sql::read_state(&self.config, key, ctx).await
    }

    async fn remove(&self, key: KeyRef<'_>, ctx: &CycleContext) -> ProxyResult<bool> {
        sql::delete_state(&self.config, key, ctx).await
    }
}
