//! Process-local [`CasStore`], for tests and single-process deployments.
//!
//! Expiry is evaluated lazily against an injectable [`Clock`]: an expired entry reads as
//! absent and is dropped the next time its key is touched. [`InMemoryCasStore::purge_expired`]
//! reclaims the rest in bulk.

use crate::cas::CasStore;
use crate::clock::{Clock, SystemClock};
use crate::error::ProxyResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<u64>,
}

impl Entry {
    fn is_live(&self, now: u64) -> bool {
        !matches!(self.expires_at, Some(at) if now >= at)
    }
}

/// Shared in-memory map; clones see the same data.
#[derive(Debug, Clone)]
pub struct InMemoryCasStore {
    entries: Arc<Mutex<HashMap<Vec<u8>, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryCasStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCasStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    pub fn with_clock<C>(clock: C) -> Self
    where
        C: Clock + 'static,
    {
        Self { entries: Arc::new(Mutex::new(HashMap::new())), clock: Arc::new(clock) }
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Vec<u8>, Entry>> {
        // Every critical section leaves the map consistent, so a poisoned lock is still usable.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live value under `key`, purging it first if it has expired.
    fn live<'a>(
        entries: &'a mut HashMap<Vec<u8>, Entry>,
        key: &[u8],
        now: u64,
    ) -> Option<&'a Entry> {
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        entries.get(key)
    }
}

#[async_trait]
impl CasStore for InMemoryCasStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &[u8]) -> ProxyResult<Option<Vec<u8>>> {
        let now = self.clock.now_millis();
        let mut entries = self.lock();
        Ok(Self::live(&mut entries, key, now).map(|entry| entry.value.clone()))
    }

    async fn compare_and_swap(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new: &[u8],
        ttl: Option<Duration>,
    ) -> ProxyResult<bool> {
        let now = self.clock.now_millis();
        let mut entries = self.lock();
        let current = Self::live(&mut entries, key, now).map(|entry| entry.value.as_slice());
        if current != expected {
            return Ok(false);
        }
        let expires_at = ttl.map(|ttl| {
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            now.saturating_add(millis)
        });
        entries.insert(key.to_vec(), Entry { value: new.to_vec(), expires_at });
        Ok(true)
    }

    async fn delete(&self, key: &[u8]) -> ProxyResult<bool> {
        let now = self.clock.now_millis();
        let mut entries = self.lock();
        let existed = Self::live(&mut entries, key, now).is_some();
        entries.remove(key);
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn absent_key_reads_none() {
        let store = InMemoryCasStore::new();
        assert_eq!(store.get(b"missing").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn swap_requires_matching_expectation() {
        let store = InMemoryCasStore::new();
        assert!(store.compare_and_swap(b"k", None, b"v1", None).await.unwrap());
        assert!(!store.compare_and_swap(b"k", None, b"v2", None).await.unwrap());
        assert!(!store.compare_and_swap(b"k", Some(&b"v0"[..]), b"v2", None).await.unwrap());
        assert!(store.compare_and_swap(b"k", Some(&b"v1"[..]), b"v2", None).await.unwrap());
        assert_eq!(store.get(b"k").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let clock = ManualClock::new(10_000);
        let store = InMemoryCasStore::with_clock(clock.clone());
        store.compare_and_swap(b"k", None, b"v", Some(Duration::from_millis(500))).await.unwrap();

        clock.advance(Duration::from_millis(499));
        assert!(store.get(b"k").await.unwrap().is_some());

        clock.advance(Duration::from_millis(1));
        assert_eq!(store.get(b"k").await.unwrap(), None);
        assert_eq!(store.len(), 0, "expired entry purged on access");
        assert!(store.compare_and_swap(b"k", None, b"fresh", None).await.unwrap());
    }

    #[tokio::test]
    async fn write_refreshes_ttl() {
        let clock = ManualClock::new(0);
        let store = InMemoryCasStore::with_clock(clock.clone());
        let ttl = Some(Duration::from_millis(100));
        store.compare_and_swap(b"k", None, b"1", ttl).await.unwrap();
        clock.advance(Duration::from_millis(80));
        store.compare_and_swap(b"k", Some(&b"1"[..]), b"2", ttl).await.unwrap();
        clock.advance(Duration::from_millis(80));
        assert_eq!(store.get(b"k").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn write_without_ttl_clears_expiry() {
        let clock = ManualClock::new(0);
        let store = InMemoryCasStore::with_clock(clock.clone());
        store.compare_and_swap(b"k", None, b"1", Some(Duration::from_millis(10))).await.unwrap();
        store.compare_and_swap(b"k", Some(&b"1"[..]), b"2", None).await.unwrap();
        clock.advance(Duration::from_secs(3600));
        assert!(store.get(b"k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let clock = ManualClock::new(0);
        let store = InMemoryCasStore::with_clock(clock.clone());
        store.compare_and_swap(b"a", None, b"x", Some(Duration::from_millis(10))).await.unwrap();
        store.compare_and_swap(b"b", None, b"y", None).await.unwrap();
        clock.advance(Duration::from_millis(20));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn delete_ignores_expired_entries() {
        let clock = ManualClock::new(0);
        let store = InMemoryCasStore::with_clock(clock.clone());
        store.compare_and_swap(b"k", None, b"v", Some(Duration::from_millis(5))).await.unwrap();
        clock.advance(Duration::from_millis(5));
        assert!(!store.delete(b"k").await.unwrap());
    }
}
