//! Session-backed strategies: no-op, ensure-only, and pass-through

use async_trait::async_trait;
use reqwest::header::HeaderMap;

use super::{RouteAuthStrategy, set_bearer};
use crate::config::{OpenIdSettings, RouteAuthenticationSettings};
use crate::service::SessionTokens;
use crate::Result;

/// Attaches nothing. Used for routes whose backend needs no identity, and as
/// the default for routes with no authentication settings at all.
#[derive(Default)]
pub struct NoAuthenticationStrategy;

#[async_trait]
impl RouteAuthStrategy for NoAuthenticationStrategy {
    fn name(&self) -> &'static str {
        "None"
    }

    async fn initialize(
        &self,
        _gateway: &OpenIdSettings,
        _route: &RouteAuthenticationSettings,
    ) -> Result<()> {
        Ok(())
    }

    async fn apply(&self, _session: &SessionTokens, _headers: &mut HeaderMap) -> Result<()> {
        Ok(())
    }
}

/// Forces a valid session token to exist (triggering refresh or a
/// re-authentication challenge as a side effect) without attaching it.
#[derive(Default)]
pub struct EnsureAuthenticatedStrategy;

#[async_trait]
impl RouteAuthStrategy for EnsureAuthenticatedStrategy {
    fn name(&self) -> &'static str {
        "EnsureAuthenticated"
    }

    async fn initialize(
        &self,
        _gateway: &OpenIdSettings,
        _route: &RouteAuthenticationSettings,
    ) -> Result<()> {
        Ok(())
    }

    async fn apply(&self, session: &SessionTokens, _headers: &mut HeaderMap) -> Result<()> {
        session.access_token().await?;
        Ok(())
    }
}

/// Attaches the current session's access token verbatim.
#[derive(Default)]
pub struct TokenPassThroughStrategy;

#[async_trait]
impl RouteAuthStrategy for TokenPassThroughStrategy {
    fn name(&self) -> &'static str {
        "TokenPassThrough"
    }

    async fn initialize(
        &self,
        _gateway: &OpenIdSettings,
        _route: &RouteAuthenticationSettings,
    ) -> Result<()> {
        Ok(())
    }

    async fn apply(&self, session: &SessionTokens, headers: &mut HeaderMap) -> Result<()> {
        let token = session.access_token().await?;
        set_bearer(headers, &token)
    }
}
