//! In-memory token record store

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{TokenRecord, TokenStore};
use crate::{Error, Result};

/// Pure in-process backend. `DashMap::insert` replaces the whole record
/// atomically, which is exactly the per-key replace semantics the store
/// contract requires.
#[derive(Default)]
pub struct MemoryTokenStore {
    records: DashMap<String, TokenRecord>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records (expired ones included until swept).
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn save_or_update(&self, record: TokenRecord) -> Result<()> {
        self.records.insert(record.session_id.clone(), record);
        Ok(())
    }

    async fn save_or_update_userinfo(&self, session_id: &str, claims: String) -> Result<()> {
        let mut entry = self
            .records
            .get_mut(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;
        entry.userinfo_claims = Some(claims);
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<TokenRecord>> {
        Ok(self.records.get(session_id).map(|r| r.clone()))
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at >= now);
        Ok(before - self.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::record;

    #[tokio::test]
    async fn upsert_and_get() {
        let store = MemoryTokenStore::new();
        store.save_or_update(record("s1", 3600)).await.unwrap();

        let loaded = store.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "access-s1");
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_whole_record() {
        let store = MemoryTokenStore::new();
        store.save_or_update(record("s1", 10)).await.unwrap();

        let mut replacement = record("s1", 3600);
        replacement.access_token = "access-new".to_string();
        replacement.refresh_token = "refresh-new".to_string();
        store.save_or_update(replacement).await.unwrap();

        let loaded = store.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "access-new");
        assert_eq!(loaded.refresh_token, "refresh-new");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn userinfo_update_requires_existing_record() {
        let store = MemoryTokenStore::new();
        let err = store
            .save_or_update_userinfo("ghost", "{}".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSession(id) if id == "ghost"));

        store.save_or_update(record("s1", 3600)).await.unwrap();
        store
            .save_or_update_userinfo("s1", r#"{"sub":"alice"}"#.to_string())
            .await
            .unwrap();
        let loaded = store.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.userinfo_claims.as_deref(), Some(r#"{"sub":"alice"}"#));
    }

    #[tokio::test]
    async fn cleanup_removes_exactly_the_expired() {
        let store = MemoryTokenStore::new();
        store.save_or_update(record("live", 3600)).await.unwrap();
        store.save_or_update(record("dead-1", -10)).await.unwrap();
        store.save_or_update(record("dead-2", -3600)).await.unwrap();

        let removed = store.cleanup_expired().await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.get("live").await.unwrap().is_some());
        assert!(store.get("dead-1").await.unwrap().is_none());
        assert!(store.get("dead-2").await.unwrap().is_none());

        // Idempotent on a clean store.
        assert_eq!(store.cleanup_expired().await.unwrap(), 0);
    }
}
