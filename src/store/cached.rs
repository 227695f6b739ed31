//! Write-through cached token store
//!
//! Layers an in-process read cache over a durable backend so the per-request
//! access-token check does not pay a storage round trip every time. Writes
//! go to the backend first and only then update the cache, so a failed write
//! never leaves the cache ahead of durable state. Concurrent first-reads of
//! the same uncached key are serialized: the backend sees at most one load
//! per cold key.

use dashmap::DashMap;
use tokio::sync::Mutex;

use async_trait::async_trait;

use super::{TokenRecord, TokenStore};
use crate::Result;

/// Read cache over any inner [`TokenStore`]
pub struct CachedTokenStore<S> {
    inner: S,
    cache: DashMap<String, TokenRecord>,
    // Coarse critical section around the check-cache-else-load-and-populate
    // sequence. Cold reads are rare (once per session per process), so one
    // lock for all keys is enough.
    load_lock: Mutex<()>,
}

impl<S: TokenStore> CachedTokenStore<S> {
    /// Wrap a backend store.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
            load_lock: Mutex::new(()),
        }
    }

    /// Number of records currently cached.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl<S: TokenStore> TokenStore for CachedTokenStore<S> {
    async fn save_or_update(&self, record: TokenRecord) -> Result<()> {
        self.inner.save_or_update(record.clone()).await?;
        self.cache.insert(record.session_id.clone(), record);
        Ok(())
    }

    async fn save_or_update_userinfo(&self, session_id: &str, claims: String) -> Result<()> {
        self.inner
            .save_or_update_userinfo(session_id, claims.clone())
            .await?;
        if let Some(mut cached) = self.cache.get_mut(session_id) {
            cached.userinfo_claims = Some(claims);
        }
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<TokenRecord>> {
        if let Some(cached) = self.cache.get(session_id) {
            return Ok(Some(cached.clone()));
        }

        let _guard = self.load_lock.lock().await;
        if let Some(cached) = self.cache.get(session_id) {
            return Ok(Some(cached.clone()));
        }

        let loaded = self.inner.get(session_id).await?;
        if let Some(record) = &loaded {
            self.cache.insert(session_id.to_string(), record.clone());
        }
        Ok(loaded)
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        let removed = self.inner.cleanup_expired().await?;
        self.cache.retain(|_, record| !record.is_expired());
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::store::{MemoryTokenStore, record};

    /// Inner store that counts `get` calls, for cold-read assertions.
    struct CountingStore {
        inner: MemoryTokenStore,
        gets: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: MemoryTokenStore::new(),
                gets: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TokenStore for CountingStore {
        async fn save_or_update(&self, record: TokenRecord) -> Result<()> {
            self.inner.save_or_update(record).await
        }

        async fn save_or_update_userinfo(&self, session_id: &str, claims: String) -> Result<()> {
            self.inner.save_or_update_userinfo(session_id, claims).await
        }

        async fn get(&self, session_id: &str) -> Result<Option<TokenRecord>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(session_id).await
        }

        async fn cleanup_expired(&self) -> Result<usize> {
            self.inner.cleanup_expired().await
        }
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let counting = CountingStore::new();
        counting.save_or_update(record("s1", 3600)).await.unwrap();
        let store = CachedTokenStore::new(counting);

        assert!(store.get("s1").await.unwrap().is_some());
        assert!(store.get("s1").await.unwrap().is_some());
        assert_eq!(store.inner.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_cold_reads_hit_backend_once() {
        let counting = CountingStore::new();
        counting.save_or_update(record("s1", 3600)).await.unwrap();
        let store = Arc::new(CachedTokenStore::new(counting));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.get("s1").await.unwrap().unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.inner.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn writes_go_through_to_backend() {
        let store = CachedTokenStore::new(MemoryTokenStore::new());
        store.save_or_update(record("s1", 3600)).await.unwrap();

        assert!(store.inner.get("s1").await.unwrap().is_some());
        assert_eq!(store.cached_len(), 1);
    }

    #[tokio::test]
    async fn userinfo_update_keeps_cache_consistent() {
        let store = CachedTokenStore::new(MemoryTokenStore::new());
        store.save_or_update(record("s1", 3600)).await.unwrap();
        store
            .save_or_update_userinfo("s1", r#"{"sub":"carol"}"#.to_string())
            .await
            .unwrap();

        let cached = store.get("s1").await.unwrap().unwrap();
        assert_eq!(cached.userinfo_claims.as_deref(), Some(r#"{"sub":"carol"}"#));
    }

    #[tokio::test]
    async fn failed_userinfo_update_does_not_touch_cache() {
        let store = CachedTokenStore::new(MemoryTokenStore::new());
        assert!(
            store
                .save_or_update_userinfo("ghost", "{}".to_string())
                .await
                .is_err()
        );
        assert_eq!(store.cached_len(), 0);
    }

    #[tokio::test]
    async fn cleanup_evicts_cache_entries_too() {
        let store = CachedTokenStore::new(MemoryTokenStore::new());
        store.save_or_update(record("live", 3600)).await.unwrap();
        store.save_or_update(record("dead", -60)).await.unwrap();

        let removed = store.cleanup_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.cached_len(), 1);
        assert!(store.get("dead").await.unwrap().is_none());
    }
}
