//! Bounded retry of single-attempt conflicts.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries).
//! - Only [`ProxyError::Conflict`] is retried; every other error returns immediately.
//! - The loop stops at whichever bound is hit first: `max_attempts`, or `max_elapsed` measured
//!   from the first attempt. Either way the caller sees [`ProxyError::ConflictExhausted`].
//! - Backoff computes the pause per retry; jitter randomizes it; the sleeper applies it.
//!
//! ```rust
//! use std::time::Duration;
//! use bucketproxy::{Backoff, InstantSleeper, Jitter, ProxyError, RetryPolicy};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .backoff(Backoff::constant(Duration::from_millis(5)))
//!     .with_jitter(Jitter::None)
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//! let result: Result<(), ProxyError> =
//!     policy.execute(|_attempt| async { Err(ProxyError::Conflict("serialization failure".into())) }).await;
//! assert_eq!(result.unwrap_err().conflict_attempts(), Some(3));
//! # });
//! ```

use crate::backoff::Backoff;
use crate::error::{ConfigError, ProxyError, ProxyResult};
use crate::jitter::Jitter;
use crate::sleeper::{Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    max_elapsed: Option<Duration>,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("max_elapsed", &self.max_elapsed)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_elapsed: None,
            backoff: default_backoff(),
            jitter: Jitter::Full,
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

const DEFAULT_MAX_ATTEMPTS: usize = 5;

fn default_backoff() -> Backoff {
    // 10ms, 20ms, 40ms, ... capped at 200ms; the constants satisfy `with_max`.
    Backoff::exponential(Duration::from_millis(10))
        .with_max(Duration::from_millis(200))
        .unwrap_or_else(|_| Backoff::constant(Duration::from_millis(10)))
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn max_elapsed(&self) -> Option<Duration> {
        self.max_elapsed
    }

    /// Run `operation` until it succeeds, fails with a non-conflict error, or a bound is hit.
    ///
    /// `operation` receives the zero-based attempt index.
    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> ProxyResult<T>
    where
        Fut: Future<Output = ProxyResult<T>>,
        Op: FnMut(usize) -> Fut,
    {
        let started = Instant::now();
        let mut attempt = 0;
        loop {
            let reason = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(ProxyError::Conflict(reason)) => reason,
                Err(e) => return Err(e),
            };
            attempt += 1;

            let elapsed = started.elapsed();
            let out_of_time = self.max_elapsed.is_some_and(|limit| elapsed >= limit);
            if attempt >= self.max_attempts || out_of_time {
                tracing::warn!(
                    target: "bucketproxy::retry",
                    attempts = attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    reason = %reason,
                    "conflict retries exhausted"
                );
                return Err(ProxyError::ConflictExhausted { attempts: attempt, elapsed });
            }

            let mut delay = self.jitter.apply(self.backoff.delay(attempt));
            if let Some(limit) = self.max_elapsed {
                delay = delay.min(limit.saturating_sub(elapsed));
            }
            tracing::debug!(
                target: "bucketproxy::retry",
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "retrying after conflict"
            );
            self.sleeper.sleep(delay).await;
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Defaults: 5 attempts, exponential backoff from 10ms capped at 200ms, full jitter.
    pub fn new() -> Self {
        Self { policy: RetryPolicy::default() }
    }

    /// Total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    /// Give up once this much time has passed since the first attempt.
    pub fn max_elapsed(mut self, limit: Duration) -> Self {
        self.policy.max_elapsed = Some(limit);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.policy.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.policy.jitter = jitter;
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.policy.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> Result<RetryPolicy, ConfigError> {
        if self.policy.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(0));
        }
        Ok(self.policy)
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
