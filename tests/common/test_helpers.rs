#![allow(dead_code)]

use async_trait::async_trait;
use bucketproxy::{CasStore, InMemoryCasStore, ProxyResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Yields to the scheduler before every store operation so concurrent cycles interleave
/// between their read and their conditional write.
#[derive(Debug, Clone, Default)]
pub struct YieldingStore {
    inner: InMemoryCasStore,
}

impl YieldingStore {
    pub fn new(inner: InMemoryCasStore) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &InMemoryCasStore {
        &self.inner
    }
}

#[async_trait]
impl CasStore for YieldingStore {
    fn name(&self) -> &'static str {
        "yielding"
    }

    async fn get(&self, key: &[u8]) -> ProxyResult<Option<Vec<u8>>> {
        tokio::task::yield_now().await;
        self.inner.get(key).await
    }

    async fn compare_and_swap(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new: &[u8],
        ttl: Option<Duration>,
    ) -> ProxyResult<bool> {
        tokio::task::yield_now().await;
        self.inner.compare_and_swap(key, expected, new, ttl).await
    }

    async fn delete(&self, key: &[u8]) -> ProxyResult<bool> {
        tokio::task::yield_now().await;
        self.inner.delete(key).await
    }
}

/// While armed, a rival writer overwrites the key just before every conditional write, so
/// every cycle loses its race. Simulates a store held by someone else.
#[derive(Debug, Clone, Default)]
pub struct RivalStore {
    inner: InMemoryCasStore,
    armed: Arc<AtomicBool>,
    rival_writes: Arc<AtomicU64>,
}

impl RivalStore {
    pub fn new() -> Self {
        let store = Self::default();
        store.armed.store(true, Ordering::SeqCst);
        store
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    pub fn rival_writes(&self) -> u64 {
        self.rival_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CasStore for RivalStore {
    fn name(&self) -> &'static str {
        "rival"
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
        if self.armed.load(Ordering::SeqCst) {
            let n = self.rival_writes.fetch_add(1, Ordering::SeqCst) + 1;
            let current = self.inner.get(key).await?;
            // The rival leaves a well-formed counter behind.
            self.inner.compare_and_swap(key, current.as_deref(), &n.to_be_bytes(), None).await?;
        }
        self.inner.compare_and_swap(key, expected, new, ttl).await
    }

    async fn delete(&self, key: &[u8]) -> ProxyResult<bool> {
        self.inner.delete(key).await
    }
}

pub fn unique_key(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}
