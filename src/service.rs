//! Session token service
//!
//! The session-scoped façade over the token store and the grant client.
//!
//! # How it works
//!
//! 1. The login handshake (outside this crate) hands over a completed grant
//!    response; [`TokenService::save_new_session`] mints a session id and
//!    persists the initial record.
//! 2. Each request binds its cookie's session id once via
//!    [`TokenService::for_session`], yielding a request-scoped
//!    [`SessionTokens`] — no mutable state is shared across requests.
//! 3. [`SessionTokens::access_token`] returns the stored token, refreshing
//!    it first when it falls inside the expiry guard window. Concurrent
//!    refreshes for one session collapse into a single grant exchange: some
//!    authorization servers rotate refresh tokens on first use, so racing
//!    refreshes would be a correctness bug, not just waste.
//! 4. A rejected refresh surfaces as [`Error::TokenRefreshFailed`], which the
//!    HTTP boundary must translate into an interactive login challenge.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Duration;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::grants::{GrantResponse, TokenClient};
use crate::store::{TokenRecord, TokenStore};
use crate::{Error, Result};

/// Guard window before actual expiry during which a token is treated as
/// already expired, tolerating clock skew and in-flight latency.
pub const EXPIRY_GUARD_SECS: i64 = 30;

/// Decoded claim set of a token or userinfo payload
pub type ClaimSet = serde_json::Map<String, serde_json::Value>;

struct Inner {
    store: Arc<dyn TokenStore>,
    client: TokenClient,
    query_userinfo_at_login: bool,
    // One guard per session id; taken only on the refresh path.
    refresh_guards: DashMap<String, Arc<Mutex<()>>>,
}

/// Shared token service; cheap to clone, one per process
#[derive(Clone)]
pub struct TokenService {
    inner: Arc<Inner>,
}

impl TokenService {
    /// Create the service.
    #[must_use]
    pub fn new(
        store: Arc<dyn TokenStore>,
        client: TokenClient,
        query_userinfo_at_login: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                query_userinfo_at_login,
                refresh_guards: DashMap::new(),
            }),
        }
    }

    /// Bind the current request's session id (or absence of one).
    #[must_use]
    pub fn for_session(&self, session_id: Option<String>) -> SessionTokens {
        SessionTokens {
            service: self.clone(),
            session_id,
        }
    }

    /// Persist a freshly completed login grant under a newly minted session
    /// id, optionally fetching userinfo claims immediately.
    pub async fn save_new_session(&self, grant: GrantResponse) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        let expires_at = grant.expires_at();
        let record = TokenRecord {
            session_id: session_id.clone(),
            id_token: grant.id_token.unwrap_or_default(),
            access_token: grant.access_token.clone(),
            refresh_token: grant.refresh_token.unwrap_or_default(),
            expires_at,
            userinfo_claims: None,
        };
        self.inner.store.save_or_update(record).await?;

        if self.inner.query_userinfo_at_login {
            let claims = self.inner.client.query_userinfo(&grant.access_token).await?;
            self.inner
                .store
                .save_or_update_userinfo(&session_id, claims)
                .await?;
        }

        info!(session = %session_id, "Created session token record");
        Ok(session_id)
    }
}

/// Token access for one request's session binding
pub struct SessionTokens {
    service: TokenService,
    session_id: Option<String>,
}

impl SessionTokens {
    /// The bound session id, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Resolve a currently valid access token for this session, refreshing
    /// it first when it expires within the guard window.
    ///
    /// # Errors
    ///
    /// - [`Error::NoSession`] when no session is bound.
    /// - [`Error::NoTokenForSession`] when the store has no record.
    /// - [`Error::TokenRefreshFailed`] when the authorization server rejects
    ///   the refresh grant — the caller must force re-authentication.
    pub async fn access_token(&self) -> Result<String> {
        let session_id = self.session_id.as_deref().ok_or(Error::NoSession)?;
        let record = self.load_record(session_id).await?;

        if !record.expires_within(Duration::seconds(EXPIRY_GUARD_SECS)) {
            return Ok(record.access_token);
        }

        let guard = self
            .service
            .inner
            .refresh_guards
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _held = guard.lock().await;

        // A concurrent request may have refreshed while we waited for the
        // guard; re-check before spending a refresh grant.
        let record = self.load_record(session_id).await?;
        if !record.expires_within(Duration::seconds(EXPIRY_GUARD_SECS)) {
            return Ok(record.access_token);
        }

        debug!(session = %session_id, "Access token inside expiry guard window, refreshing");
        let Some(grant) = self.service.inner.client.refresh(&record.refresh_token).await? else {
            warn!(session = %session_id, "Refresh rejected; session requires re-authentication");
            return Err(Error::TokenRefreshFailed);
        };

        let access_token = grant.access_token.clone();
        let expires_at = grant.expires_at();
        let refreshed = TokenRecord {
            session_id: record.session_id,
            // Authorities may omit id/refresh tokens on refresh; keep the
            // previous ones in that case so the record stays complete.
            id_token: grant.id_token.unwrap_or(record.id_token),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.unwrap_or(record.refresh_token),
            expires_at,
            userinfo_claims: record.userinfo_claims,
        };
        self.service.inner.store.save_or_update(refreshed).await?;

        info!(session = %session_id, "Refreshed session access token");
        Ok(access_token)
    }

    /// Claims carried in the session's identity token.
    ///
    /// Returns an empty claim set when no session is bound at all;
    /// [`Error::NoTokenForSession`] when the session has no record.
    pub async fn identity_claims(&self) -> Result<ClaimSet> {
        match self.bound_record().await? {
            Some(record) => decode_jwt_claims(&record.id_token),
            None => Ok(ClaimSet::new()),
        }
    }

    /// Claims carried in the session's access token.
    pub async fn access_token_claims(&self) -> Result<ClaimSet> {
        match self.bound_record().await? {
            Some(record) => decode_jwt_claims(&record.access_token),
            None => Ok(ClaimSet::new()),
        }
    }

    /// Claims from the stored userinfo payload, empty if never fetched.
    pub async fn userinfo_claims(&self) -> Result<ClaimSet> {
        match self.bound_record().await? {
            Some(record) => match record.userinfo_claims {
                Some(payload) => Ok(serde_json::from_str(&payload)?),
                None => Ok(ClaimSet::new()),
            },
            None => Ok(ClaimSet::new()),
        }
    }

    async fn load_record(&self, session_id: &str) -> Result<TokenRecord> {
        self.service
            .inner
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| Error::NoTokenForSession(session_id.to_string()))
    }

    /// Record for the bound session; `None` when no session is bound (claim
    /// lookups treat that as "no claims", not an error).
    async fn bound_record(&self) -> Result<Option<TokenRecord>> {
        match self.session_id.as_deref() {
            Some(session_id) => Ok(Some(self.load_record(session_id).await?)),
            None => Ok(None),
        }
    }
}

/// Decode the payload segment of a JWT without verifying its signature.
///
/// Signature validation is the login middleware's concern; by the time a
/// token reaches this store it has already been accepted. Claims here feed
/// logging and application-level lookups only.
fn decode_jwt_claims(token: &str) -> Result<ClaimSet> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::Internal("Malformed JWT: missing payload segment".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| Error::Internal(format!("Malformed JWT payload: {e}")))?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::config::OpenIdSettings;
    use crate::discovery::DiscoveryResolver;
    use crate::store::{MemoryTokenStore, record};

    fn service(store: Arc<dyn TokenStore>) -> TokenService {
        let http = reqwest::Client::new();
        let discovery = Arc::new(DiscoveryResolver::new(http.clone()));
        let client = TokenClient::new(
            http,
            discovery,
            OpenIdSettings {
                // Unroutable; tests below never reach the network.
                authority: "http://127.0.0.1:1".to_string(),
                client_id: "gateway".to_string(),
                client_secret: "secret".to_string(),
                scope: "openid".to_string(),
                query_userinfo_at_login: false,
            },
        );
        TokenService::new(store, client, false)
    }

    fn test_jwt(claims: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
        format!("{header}.{payload}.sig")
    }

    #[tokio::test]
    async fn unbound_session_fails_access_token() {
        let service = service(Arc::new(MemoryTokenStore::new()));
        let err = service.for_session(None).access_token().await.unwrap_err();
        assert!(matches!(err, Error::NoSession));
    }

    #[tokio::test]
    async fn unknown_session_fails_with_no_token() {
        let service = service(Arc::new(MemoryTokenStore::new()));
        let err = service
            .for_session(Some("ghost".to_string()))
            .access_token()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoTokenForSession(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn valid_token_returned_without_network() {
        let store = Arc::new(MemoryTokenStore::new());
        store.save_or_update(record("s1", 3600)).await.unwrap();

        let service = service(store);
        let token = service
            .for_session(Some("s1".to_string()))
            .access_token()
            .await
            .unwrap();
        assert_eq!(token, "access-s1");
    }

    #[tokio::test]
    async fn save_new_session_mints_unique_ids() {
        let store = Arc::new(MemoryTokenStore::new());
        let service = service(Arc::clone(&store) as Arc<dyn TokenStore>);

        let grant = |at: &str| GrantResponse {
            access_token: at.to_string(),
            refresh_token: Some("rt".to_string()),
            id_token: Some("idt".to_string()),
            expires_in: 300,
        };

        let a = service.save_new_session(grant("at-a")).await.unwrap();
        let b = service.save_new_session(grant("at-b")).await.unwrap();
        assert_ne!(a, b);

        let stored = store.get(&a).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "at-a");
        assert_eq!(stored.refresh_token, "rt");
        assert!(stored.expires_at > Utc::now() + Duration::seconds(250));
    }

    #[tokio::test]
    async fn save_new_session_tolerates_degenerate_lifetime() {
        let store = Arc::new(MemoryTokenStore::new());
        let service = service(Arc::clone(&store) as Arc<dyn TokenStore>);

        // An absurd expires_in saturates to the maximum instant instead of
        // panicking on timestamp overflow.
        let session_id = service
            .save_new_session(GrantResponse {
                access_token: "at".to_string(),
                refresh_token: Some("rt".to_string()),
                id_token: None,
                expires_in: u64::MAX,
            })
            .await
            .unwrap();

        let stored = store.get(&session_id).await.unwrap().unwrap();
        assert!(!stored.is_expired());
        assert!(!stored.expires_within(Duration::seconds(EXPIRY_GUARD_SECS)));
    }

    #[tokio::test]
    async fn claims_empty_when_no_session_bound() {
        let service = service(Arc::new(MemoryTokenStore::new()));
        let session = service.for_session(None);
        assert!(session.identity_claims().await.unwrap().is_empty());
        assert!(session.access_token_claims().await.unwrap().is_empty());
        assert!(session.userinfo_claims().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claims_fail_for_session_without_record() {
        let service = service(Arc::new(MemoryTokenStore::new()));
        let session = service.for_session(Some("ghost".to_string()));
        assert!(matches!(
            session.identity_claims().await.unwrap_err(),
            Error::NoTokenForSession(_)
        ));
    }

    #[tokio::test]
    async fn identity_claims_decode_jwt_payload() {
        let store = Arc::new(MemoryTokenStore::new());
        let mut rec = record("s1", 3600);
        rec.id_token = test_jwt(&serde_json::json!({"sub": "alice", "name": "Alice"}));
        store.save_or_update(rec).await.unwrap();

        let service = service(store);
        let claims = service
            .for_session(Some("s1".to_string()))
            .identity_claims()
            .await
            .unwrap();
        assert_eq!(claims["sub"], "alice");
        assert_eq!(claims["name"], "Alice");
    }

    #[tokio::test]
    async fn userinfo_claims_parse_stored_payload() {
        let store = Arc::new(MemoryTokenStore::new());
        store.save_or_update(record("s1", 3600)).await.unwrap();
        store
            .save_or_update_userinfo("s1", r#"{"email":"a@example.com"}"#.to_string())
            .await
            .unwrap();

        let service = service(store);
        let session = service.for_session(Some("s1".to_string()));
        let claims = session.userinfo_claims().await.unwrap();
        assert_eq!(claims["email"], "a@example.com");
    }

    #[test]
    fn decode_rejects_malformed_tokens() {
        assert!(decode_jwt_claims("no-dots-here").is_err());
        assert!(decode_jwt_claims("a.!!!.c").is_err());
    }
}
