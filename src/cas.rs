//! Lock-free compare-and-swap coordination over a key/value store.
//!
//! One cycle reads the current value, applies the transition, and asks the store to write
//! the result only if the value is still what was read. A rejected write means another
//! writer got there first: the loop re-reads and re-applies. Contention is unbounded in
//! principle, so the loop is bounded by time, not attempts: by the request timeout when one
//! is configured, otherwise by the backend's convergence budget.

use crate::backend::{Backend, CycleContext};
use crate::backoff::Backoff;
use crate::error::{ProxyError, ProxyResult};
use crate::jitter::Jitter;
use crate::key::{KeyMapper, KeyRef};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::transition::Transition;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Default bound on the loop when no request timeout is configured.
pub const DEFAULT_CONVERGENCE_BUDGET: Duration = Duration::from_secs(30);

/// Atomic primitives a key/value store must offer.
#[async_trait]
pub trait CasStore: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Current value under `key`, or `None` if absent or expired.
    async fn get(&self, key: &[u8]) -> ProxyResult<Option<Vec<u8>>>;

    /// Atomically write `new` under `key` if the stored value equals `expected`
    /// (`None`: the key must not exist). With `ttl` the write also (re)sets the key's
    /// time-to-live; without it the key is persistent.
    ///
    /// Returns `Ok(false)` when the stored value did not match.
    async fn compare_and_swap(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new: &[u8],
        ttl: Option<Duration>,
    ) -> ProxyResult<bool>;

    /// Delete `key`. Returns whether it existed.
    async fn delete(&self, key: &[u8]) -> ProxyResult<bool>;
}

/// [`Backend`] running the compare-and-swap loop over any [`CasStore`].
#[derive(Debug, Clone)]
pub struct CasBackend<S> {
    store: S,
    key_mapper: KeyMapper,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
    convergence_budget: Duration,
}

impl<S: CasStore> CasBackend<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            key_mapper: KeyMapper::any(),
            backoff: default_pause(),
            jitter: Jitter::Full,
            sleeper: Arc::new(TokioSleeper),
            convergence_budget: DEFAULT_CONVERGENCE_BUDGET,
        }
    }

    pub fn with_key_mapper(mut self, key_mapper: KeyMapper) -> Self {
        self.key_mapper = key_mapper;
        self
    }

    /// Bound the loop when calls carry no request timeout.
    pub fn with_convergence_budget(mut self, budget: Duration) -> Self {
        self.convergence_budget = budget;
        self
    }

    /// Pause schedule between lost races.
    pub fn with_backoff(mut self, backoff: Backoff, jitter: Jitter) -> Self {
        self.backoff = backoff;
        self.jitter = jitter;
        self
    }

    pub fn with_sleeper<Z>(mut self, sleeper: Z) -> Self
    where
        Z: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn key_mapper(&self) -> &KeyMapper {
        &self.key_mapper
    }

    async fn converge<T>(
        &self,
        physical: &[u8],
        transition: &T,
        ctx: &CycleContext,
    ) -> ProxyResult<T::Output>
    where
        T: Transition,
    {
        let guard = ctx.guard();
        let ttl = ctx.expiration().ttl();
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            tracing::Span::current().record("attempts", attempt);

            let current = self.store.get(physical).await?;
            let (state, output) = transition
                .apply(current.as_deref())
                .map_err(ProxyError::TransitionFailed)?
                .into_parts();
            let Some(state) = state else {
                return Ok(output);
            };

            if self.store.compare_and_swap(physical, current.as_deref(), &state, ttl).await? {
                tracing::debug!(target: "bucketproxy::cas", attempt, "conditional write applied");
                return Ok(output);
            }

            let elapsed = guard.elapsed();
            if guard.is_expired() {
                tracing::warn!(
                    target: "bucketproxy::cas",
                    attempts = attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "request timeout reached before compare-and-swap converged"
                );
                return Err(guard.expired_error());
            }
            if guard.timeout().is_none() && elapsed >= self.convergence_budget {
                tracing::warn!(
                    target: "bucketproxy::cas",
                    attempts = attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "convergence budget exhausted"
                );
                return Err(ProxyError::ConflictExhausted { attempts: attempt, elapsed });
            }

            let mut pause = self.jitter.apply(self.backoff.delay(attempt));
            if let Some(remaining) = guard.remaining() {
                pause = pause.min(remaining);
            }
            tracing::debug!(
                target: "bucketproxy::cas",
                attempt,
                pause_us = pause.as_micros() as u64,
                "lost compare-and-swap race"
            );
            self.sleeper.sleep(pause).await;
        }
    }
}

fn default_pause() -> Backoff {
    // 1ms doubling to 32ms; the constants satisfy `with_max`.
    Backoff::exponential(Duration::from_millis(1))
        .with_max(Duration::from_millis(32))
        .unwrap_or_else(|_| Backoff::constant(Duration::from_millis(1)))
}

#[async_trait]
impl<S: CasStore> Backend for CasBackend<S> {
    fn name(&self) -> &'static str {
        self.store.name()
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
        let physical = self.key_mapper.map(key)?;
        let span = tracing::debug_span!(
            target: "bucketproxy::cas",
            "cas_cycle",
            store = self.store.name(),
            attempts = tracing::field::Empty,
        );
        self.converge(&physical, transition, ctx).instrument(span).await
    }

    async fn read(&self, key: KeyRef<'_>, _ctx: &CycleContext) -> ProxyResult<Option<Vec<u8>>> {
        let physical = self.key_mapper.map(key)?;
        self.store.get(&physical).await
    }

    async fn remove(&self, key: KeyRef<'_>, _ctx: &CycleContext) -> ProxyResult<bool> {
        let physical = self.key_mapper.map(key)?;
        self.store.delete(&physical).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientSideConfig;
    use crate::expiration::ExpirationPolicy;
    use crate::memory::InMemoryCasStore;
    use crate::sleeper::TrackingSleeper;
    use crate::testing::{increment, read_counter, CountingTransition};
    use crate::transition::{from_fn, Mutation};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store whose first `losses` conditional writes are rejected as if another writer won.
    #[derive(Debug, Clone)]
    struct Contended {
        inner: InMemoryCasStore,
        losses: Arc<AtomicUsize>,
    }

    impl Contended {
        fn new(losses: usize) -> Self {
            Self { inner: InMemoryCasStore::new(), losses: Arc::new(AtomicUsize::new(losses)) }
        }
    }

    #[async_trait]
    impl CasStore for Contended {
        fn name(&self) -> &'static str {
            "contended"
        }

        async fn get(&self, key: &[u8]) -> ProxyResult<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn compare_and_swap(
            &self,
            key: &[u8],
            expected: Option<&[u8]>,
            new: &[u8],
            ttl: Option<Duration>,
        ) -> ProxyResult<bool> {
            let lose = self
                .losses
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lose {
                return Ok(false);
            }
            self.inner.compare_and_swap(key, expected, new, ttl).await
        }

        async fn delete(&self, key: &[u8]) -> ProxyResult<bool> {
            self.inner.delete(key).await
        }
    }

    fn ctx(timeout: Option<Duration>) -> CycleContext {
        let config = match timeout {
            Some(t) => ClientSideConfig::new().with_request_timeout(t).unwrap(),
            None => ClientSideConfig::new(),
        };
        CycleContext::new(config, ExpirationPolicy::none())
    }

    #[tokio::test]
    async fn first_write_is_an_upsert() {
        let backend = CasBackend::new(InMemoryCasStore::new());
        let value = backend.execute(KeyRef::Integer(1), &increment(5), &ctx(None)).await.unwrap();
        assert_eq!(value, 5);
        let stored = backend.read(KeyRef::Integer(1), &ctx(None)).await.unwrap();
        assert_eq!(read_counter(stored.as_deref()).unwrap(), 5);
    }

    #[tokio::test]
    async fn lost_races_reapply_transition() {
        let sleeper = TrackingSleeper::new();
        let backend = CasBackend::new(Contended::new(3))
            .with_backoff(Backoff::constant(Duration::from_millis(2)), Jitter::None)
            .with_sleeper(sleeper.clone());
        let counting = CountingTransition::new(increment(1));

        let value = backend.execute(KeyRef::Text("k"), &counting, &ctx(None)).await.unwrap();

        assert_eq!(value, 1);
        assert_eq!(counting.invocations(), 4);
        assert_eq!(sleeper.calls(), vec![Duration::from_millis(2); 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn endless_contention_times_out() {
        let backend = CasBackend::new(Contended::new(usize::MAX))
            .with_backoff(Backoff::constant(Duration::from_millis(10)), Jitter::None);

        let err = backend
            .execute(KeyRef::Integer(7), &increment(1), &ctx(Some(Duration::from_millis(100))))
            .await
            .unwrap_err();

        let (elapsed, timeout) = err.timeout_details().expect("timeout error");
        assert_eq!(timeout, Duration::from_millis(100));
        assert!(elapsed >= timeout && elapsed < Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn without_timeout_budget_bounds_the_loop() {
        let backend = CasBackend::new(Contended::new(usize::MAX))
            .with_backoff(Backoff::constant(Duration::from_millis(10)), Jitter::None)
            .with_convergence_budget(Duration::from_millis(50));

        let err = backend.execute(KeyRef::Integer(7), &increment(1), &ctx(None)).await.unwrap_err();

        assert!(err.is_conflict_exhausted());
        assert!(err.conflict_attempts().unwrap() >= 5);
    }

    #[tokio::test]
    async fn keep_mutation_skips_write() {
        let backend = CasBackend::new(Contended::new(usize::MAX));
        let peek = from_fn(|current| Ok(Mutation::keep(current.is_some())));
        let seen = backend.execute(KeyRef::Integer(3), &peek, &ctx(None)).await.unwrap();
        assert!(!seen);
    }

    #[tokio::test]
    async fn transition_failure_writes_nothing() {
        let backend = CasBackend::new(InMemoryCasStore::new());
        let failing = from_fn(|_current| -> Result<Mutation<()>, _> { Err("over limit".into()) });

        let err = backend.execute(KeyRef::Integer(4), &failing, &ctx(None)).await.unwrap_err();

        assert!(err.is_transition_failure());
        assert_eq!(backend.read(KeyRef::Integer(4), &ctx(None)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn mapper_rejects_wrong_key_kind() {
        let backend = CasBackend::new(InMemoryCasStore::new()).with_key_mapper(KeyMapper::integer());
        let err = backend.execute(KeyRef::Text("x"), &increment(1), &ctx(None)).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn remove_reports_presence() {
        let backend = CasBackend::new(InMemoryCasStore::new());
        backend.execute(KeyRef::Bytes(b"b"), &increment(1), &ctx(None)).await.unwrap();
        assert!(backend.remove(KeyRef::Bytes(b"b"), &ctx(None)).await.unwrap());
        assert!(!backend.remove(KeyRef::Bytes(b"b"), &ctx(None)).await.unwrap());
    }
}
