//! On-behalf-of (JWT-bearer) exchange strategy
//!
//! Exchanges the current session's access token, used as an assertion, for a
//! new access token scoped to the target backend. Nothing is cached: the
//! assertion itself may have just been refreshed by the token service, so
//! every apply performs a fresh exchange.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use reqwest::header::HeaderMap;
use tracing::debug;

use super::{RouteAuthStrategy, require_option, set_bearer};
use crate::config::{OpenIdSettings, RouteAuthenticationSettings};
use crate::discovery::{DiscoveryDocument, DiscoveryResolver};
use crate::grants::execute_grant;
use crate::service::SessionTokens;
use crate::{Error, Result};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

#[derive(Clone)]
struct Initialized {
    client_id: String,
    client_secret: String,
    scope: String,
    endpoints: Arc<DiscoveryDocument>,
}

/// Azure AD style on-behalf-of token exchange
pub struct OnBehalfOfStrategy {
    http: Client,
    discovery: Arc<DiscoveryResolver>,
    state: RwLock<Option<Initialized>>,
}

impl OnBehalfOfStrategy {
    /// Create an uninitialized strategy instance.
    #[must_use]
    pub fn new(http: Client, discovery: Arc<DiscoveryResolver>) -> Self {
        Self {
            http,
            discovery,
            state: RwLock::new(None),
        }
    }
}

#[async_trait]
impl RouteAuthStrategy for OnBehalfOfStrategy {
    fn name(&self) -> &'static str {
        "AzureOnBehalfOf"
    }

    async fn initialize(
        &self,
        gateway: &OpenIdSettings,
        route: &RouteAuthenticationSettings,
    ) -> Result<()> {
        let authority = require_option(self.name(), route, "Authority", Some(&gateway.authority))?;
        let client_id = require_option(self.name(), route, "ClientId", Some(&gateway.client_id))?;
        let client_secret = require_option(
            self.name(),
            route,
            "ClientSecret",
            Some(&gateway.client_secret),
        )?;
        // The downstream scope is what distinguishes one OBO route from
        // another; no gateway fallback makes sense here.
        let scope = require_option(self.name(), route, "Scope", None)?;

        let endpoints = self.discovery.resolve(&authority).await?;
        *self.state.write() = Some(Initialized {
            client_id,
            client_secret,
            scope,
            endpoints,
        });
        Ok(())
    }

    async fn apply(&self, session: &SessionTokens, headers: &mut HeaderMap) -> Result<()> {
        let init = self
            .state
            .read()
            .clone()
            .ok_or(Error::NotInitialized("AzureOnBehalfOf"))?;

        // Whatever the token service currently reports, refreshed if needed.
        let assertion = session.access_token().await?;

        let params = [
            ("grant_type", JWT_BEARER_GRANT),
            ("client_id", init.client_id.as_str()),
            ("client_secret", init.client_secret.as_str()),
            ("assertion", assertion.as_str()),
            ("scope", init.scope.as_str()),
            ("requested_token_use", "on_behalf_of"),
        ];
        let grant = execute_grant(&self.http, &init.endpoints.token_endpoint, &params).await?;
        debug!(expires_in = grant.expires_in, "On-behalf-of exchange succeeded");

        set_bearer(headers, &grant.access_token)
    }
}
