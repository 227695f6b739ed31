//! Token record storage
//!
//! One [`TokenRecord`] per active browser session. The store is the only
//! piece of mutable shared state in the subsystem and must be safe for
//! unbounded concurrent readers and writers keyed by session id. A record is
//! always replaced as a unit: id token, access token, refresh token and
//! expiry move together, never piecewise.
//!
//! Backends:
//! - [`MemoryTokenStore`] — plain in-process map.
//! - [`FileTokenStore`] — one JSON document per session on disk.
//! - [`CachedTokenStore`] — write-through read cache layered over another
//!   backend, avoiding a storage round trip on every access-token check.

mod cached;
mod file;
mod memory;

pub use cached::CachedTokenStore;
pub use file::FileTokenStore;
pub use memory::MemoryTokenStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Tokens bound to one browser session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Opaque session identifier, primary key, minted at login
    pub session_id: String,
    /// OIDC identity token
    pub id_token: String,
    /// Bearer access token presented to backends
    pub access_token: String,
    /// Refresh token used to obtain a replacement token set
    pub refresh_token: String,
    /// Absolute instant at which `access_token` becomes invalid
    pub expires_at: DateTime<Utc>,
    /// Raw userinfo claim payload, populated lazily
    #[serde(default)]
    pub userinfo_claims: Option<String>,
}

impl TokenRecord {
    /// Whether the access token expires within the given guard window.
    ///
    /// Tokens are treated as expired slightly early to tolerate clock skew
    /// and in-flight latency.
    #[must_use]
    pub fn expires_within(&self, window: Duration) -> bool {
        self.expires_at - Utc::now() < window
    }

    /// Whether the access token has already expired outright.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

/// Keyed storage for per-session token sets
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Idempotent upsert of a whole token record.
    async fn save_or_update(&self, record: TokenRecord) -> Result<()>;

    /// Attach (or replace) the userinfo claim payload of an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownSession`] if no record exists for the
    /// session id.
    async fn save_or_update_userinfo(&self, session_id: &str, claims: String) -> Result<()>;

    /// Fetch the record for a session, if any.
    async fn get(&self, session_id: &str) -> Result<Option<TokenRecord>>;

    /// Remove every record whose expiry has passed. Returns the number of
    /// records removed.
    async fn cleanup_expired(&self) -> Result<usize>;
}

#[cfg(test)]
pub(crate) fn record(session_id: &str, expires_in_secs: i64) -> TokenRecord {
    TokenRecord {
        session_id: session_id.to_string(),
        id_token: format!("id-{session_id}"),
        access_token: format!("access-{session_id}"),
        refresh_token: format!("refresh-{session_id}"),
        expires_at: Utc::now() + Duration::seconds(expires_in_secs),
        userinfo_claims: None,
    }
}
