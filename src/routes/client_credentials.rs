//! Client-credentials strategy
//!
//! Obtains a backend identity independent of any browser session: the route
//! holds its own client id/secret and exchanges them for an access token,
//! cached per strategy instance until it nears expiry. The Auth0 variant
//! reuses the same machinery and adds the vendor's required `audience`
//! parameter to the grant form.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use reqwest::Client;
use reqwest::header::HeaderMap;
use tokio::sync::Mutex;
use tracing::debug;

use super::{RouteAuthStrategy, require_option, set_bearer};
use crate::config::{OpenIdSettings, RouteAuthenticationSettings};
use crate::discovery::{DiscoveryDocument, DiscoveryResolver};
use crate::grants::execute_grant;
use crate::service::{EXPIRY_GUARD_SECS, SessionTokens};
use crate::{Error, Result};

#[derive(Clone)]
struct Initialized {
    client_id: String,
    client_secret: String,
    scope: String,
    audience: Option<String>,
    endpoints: Arc<DiscoveryDocument>,
}

#[derive(Clone)]
struct CachedGrant {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedGrant {
    fn is_fresh(&self) -> bool {
        self.expires_at - Utc::now() >= Duration::seconds(EXPIRY_GUARD_SECS)
    }
}

/// Client-credentials grant strategy, with an optional required `audience`
/// parameter for the Auth0 variant
pub struct ClientCredentialsStrategy {
    name: &'static str,
    require_audience: bool,
    http: Client,
    discovery: Arc<DiscoveryResolver>,
    state: RwLock<Option<Initialized>>,
    cached: RwLock<Option<CachedGrant>>,
    // Collapses concurrent grant exchanges on a cold or expiring cache.
    fetch_lock: Mutex<()>,
}

impl ClientCredentialsStrategy {
    /// Plain client-credentials variant (`ClientCredentials`).
    #[must_use]
    pub fn new(http: Client, discovery: Arc<DiscoveryResolver>) -> Self {
        Self::with_variant("ClientCredentials", false, http, discovery)
    }

    /// Auth0 variant (`Auth0ClientCredentialsOnly`): same grant plus the
    /// vendor's mandatory `audience` parameter.
    #[must_use]
    pub fn auth0(http: Client, discovery: Arc<DiscoveryResolver>) -> Self {
        Self::with_variant("Auth0ClientCredentialsOnly", true, http, discovery)
    }

    fn with_variant(
        name: &'static str,
        require_audience: bool,
        http: Client,
        discovery: Arc<DiscoveryResolver>,
    ) -> Self {
        Self {
            name,
            require_audience,
            http,
            discovery,
            state: RwLock::new(None),
            cached: RwLock::new(None),
            fetch_lock: Mutex::new(()),
        }
    }

    async fn fetch_grant(&self, init: &Initialized) -> Result<CachedGrant> {
        let mut params = vec![
            ("grant_type", "client_credentials"),
            ("client_id", init.client_id.as_str()),
            ("client_secret", init.client_secret.as_str()),
            ("scope", init.scope.as_str()),
        ];
        if let Some(audience) = init.audience.as_deref() {
            params.push(("audience", audience));
        }

        let grant = execute_grant(&self.http, &init.endpoints.token_endpoint, &params).await?;
        debug!(strategy = self.name, expires_in = grant.expires_in, "Obtained client-credentials token");
        let expires_at = grant.expires_at();
        Ok(CachedGrant {
            access_token: grant.access_token,
            expires_at,
        })
    }
}

#[async_trait]
impl RouteAuthStrategy for ClientCredentialsStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn initialize(
        &self,
        gateway: &OpenIdSettings,
        route: &RouteAuthenticationSettings,
    ) -> Result<()> {
        let authority = require_option(self.name, route, "Authority", Some(&gateway.authority))?;
        let client_id = require_option(self.name, route, "ClientId", Some(&gateway.client_id))?;
        let client_secret =
            require_option(self.name, route, "ClientSecret", Some(&gateway.client_secret))?;
        let scope = require_option(self.name, route, "Scope", Some(&gateway.scope))?;
        let audience = if self.require_audience {
            Some(require_option(self.name, route, "Audience", None)?)
        } else {
            route.option("Audience").map(ToString::to_string)
        };

        let endpoints = self.discovery.resolve(&authority).await?;
        *self.state.write() = Some(Initialized {
            client_id,
            client_secret,
            scope,
            audience,
            endpoints,
        });
        Ok(())
    }

    async fn apply(&self, _session: &SessionTokens, headers: &mut HeaderMap) -> Result<()> {
        let init = self
            .state
            .read()
            .clone()
            .ok_or(Error::NotInitialized(self.name))?;

        if let Some(cached) = self.cached.read().clone() {
            if cached.is_fresh() {
                return set_bearer(headers, &cached.access_token);
            }
        }

        let _guard = self.fetch_lock.lock().await;
        // A concurrent apply may have repopulated the cache while we waited.
        if let Some(cached) = self.cached.read().clone() {
            if cached.is_fresh() {
                return set_bearer(headers, &cached.access_token);
            }
        }

        let grant = self.fetch_grant(&init).await?;
        let token = grant.access_token.clone();
        *self.cached.write() = Some(grant);
        set_bearer(headers, &token)
    }
}
