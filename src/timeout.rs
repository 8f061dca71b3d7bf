//! Client-side timeout guard for one coordination cycle.
//!
//! The guard starts its clock when the cycle begins. Backends read
//! [`remaining`](TimeoutGuard::remaining) to bound store-side waits (PostgreSQL
//! `lock_timeout`, the CAS retry loop) and the facade wraps the whole cycle in
//! [`run`](TimeoutGuard::run) as a backstop.
//!
//! On expiry the in-flight future is dropped. Every backend ties its critical section to a
//! value whose drop withdraws it (an open transaction rolls back and releases its
//! transaction-scoped locks; an unsent conditional write is simply never sent), so an
//! abandoned cycle leaves no partial write behind.

use crate::error::{ProxyError, ProxyResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct TimeoutGuard {
    started: Instant,
    timeout: Option<Duration>,
}

impl TimeoutGuard {
    /// Start a guard now. `None` means the cycle is unbounded.
    pub fn start(timeout: Option<Duration>) -> Self {
        Self { started: Instant::now(), timeout }
    }

    pub fn unbounded() -> Self {
        Self::start(None)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|t| self.started + t)
    }

    /// Time left before the deadline, saturating at zero. `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.timeout.map(|t| t.saturating_sub(self.elapsed()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }

    /// The [`ProxyError::Timeout`] describing this guard right now.
    pub fn expired_error(&self) -> ProxyError {
        let elapsed = self.elapsed();
        ProxyError::Timeout { elapsed, timeout: self.timeout.unwrap_or(elapsed) }
    }

    /// Drive `operation` to completion or until the deadline, whichever comes first.
    pub async fn run<T, Fut>(&self, operation: Fut) -> ProxyResult<T>
    where
        Fut: Future<Output = ProxyResult<T>>,
    {
        let Some(remaining) = self.remaining() else {
            return operation.await;
        };
        match tokio::time::timeout(remaining, operation).await {
            Ok(result) => result,
            Err(_) => {
                let err = self.expired_error();
                tracing::warn!(
                    target: "bucketproxy::timeout",
                    elapsed_ms = self.elapsed().as_millis() as u64,
                    timeout_ms = self.timeout.unwrap_or_default().as_millis() as u64,
                    "coordination cycle abandoned at deadline"
                );
                Err(err)
            }
        }
    }
}
