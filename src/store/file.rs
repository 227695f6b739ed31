//! Durable token record store
//!
//! Persists one JSON document per session under a base directory so token
//! state survives gateway restarts. File names are derived from a SHA-256
//! digest of the session id: the session id is a bearer-adjacent secret from
//! a cookie and should not appear verbatim in directory listings.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use super::{TokenRecord, TokenStore};
use crate::{Error, Result};

/// File-per-session durable backend
pub struct FileTokenStore {
    base_dir: PathBuf,
}

impl FileTokenStore {
    /// Create the store, creating the base directory if needed.
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    fn record_path(&self, session_id: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(session_id.as_bytes());
        let hash = hasher.finalize();
        // First 8 digest bytes as 16 hex characters.
        let key: String = hash.iter().take(8).map(|b| format!("{b:02x}")).collect();
        self.base_dir.join(format!("{key}.json"))
    }

    async fn read_record(path: &Path) -> Result<Option<TokenRecord>> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn write_record(&self, path: &Path, record: &TokenRecord) -> Result<()> {
        let content = serde_json::to_string_pretty(record)?;
        fs::write(path, content).await?;

        // Owner read/write only; token material lives in these files.
        #[cfg(unix)]
        {
            use std::fs::Permissions;
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(path, Permissions::from_mode(0o600)).await;
        }

        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn save_or_update(&self, record: TokenRecord) -> Result<()> {
        let path = self.record_path(&record.session_id);
        self.write_record(&path, &record).await?;
        debug!(session = %record.session_id, "Persisted token record");
        Ok(())
    }

    async fn save_or_update_userinfo(&self, session_id: &str, claims: String) -> Result<()> {
        let path = self.record_path(session_id);
        let mut record = Self::read_record(&path)
            .await?
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;
        record.userinfo_claims = Some(claims);
        self.write_record(&path, &record).await
    }

    async fn get(&self, session_id: &str) -> Result<Option<TokenRecord>> {
        Self::read_record(&self.record_path(session_id)).await
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;

        let mut entries = fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }

            match Self::read_record(&path).await {
                Ok(Some(record)) if record.expires_at < now => {
                    fs::remove_file(&path).await?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    // An unreadable file is skipped, not fatal: the sweeper
                    // will try again next interval.
                    warn!(path = %path.display(), error = %e, "Skipping unreadable token record");
                }
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::record;

    async fn store() -> (tempfile::TempDir, FileTokenStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn roundtrip_through_disk() {
        let (_dir, store) = store().await;
        store.save_or_update(record("s1", 3600)).await.unwrap();

        let loaded = store.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.session_id, "s1");
        assert!(store.get("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn filenames_do_not_leak_session_ids() {
        let (dir, store) = store().await;
        store
            .save_or_update(record("super-secret-session", 3600))
            .await
            .unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(!names[0].contains("super-secret-session"));
    }

    #[tokio::test]
    async fn record_paths_are_stable_hex_keys() {
        let (dir, store) = store().await;
        store.save_or_update(record("s1", 3600)).await.unwrap();
        // Updating the same session reuses the same file.
        store.save_or_update(record("s1", 7200)).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);

        let key = names[0].strip_suffix(".json").unwrap();
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[tokio::test]
    async fn userinfo_update_persists() {
        let (_dir, store) = store().await;
        let err = store
            .save_or_update_userinfo("ghost", "{}".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSession(_)));

        store.save_or_update(record("s1", 3600)).await.unwrap();
        store
            .save_or_update_userinfo("s1", r#"{"sub":"bob"}"#.to_string())
            .await
            .unwrap();

        let loaded = store.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.userinfo_claims.as_deref(), Some(r#"{"sub":"bob"}"#));
        // The rest of the record is untouched.
        assert_eq!(loaded.access_token, "access-s1");
    }

    #[tokio::test]
    async fn cleanup_deletes_expired_files() {
        let (dir, store) = store().await;
        store.save_or_update(record("live", 3600)).await.unwrap();
        store.save_or_update(record("dead", -60)).await.unwrap();

        let removed = store.cleanup_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("live").await.unwrap().is_some());
        assert!(store.get("dead").await.unwrap().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn cleanup_skips_unparsable_files() {
        let (dir, store) = store().await;
        store.save_or_update(record("live", 3600)).await.unwrap();
        std::fs::write(dir.path().join("garbage.json"), "not json").unwrap();

        let removed = store.cleanup_expired().await.unwrap();
        assert_eq!(removed, 0);
        assert!(store.get("live").await.unwrap().is_some());
    }
}
