//! Per-route backend authentication strategies
//!
//! Each configured route picks one strategy by name; the strategy decorates
//! an outbound request with proof of identity appropriate for that backend.
//! Strategies are initialized once from configuration and memoized per route
//! *name* by the [`manager::RouteAuthManager`] — two routes sharing a
//! strategy type still get independent instances and independent caches.

mod basic;
mod client_credentials;
mod manager;
mod on_behalf_of;

pub use basic::{EnsureAuthenticatedStrategy, NoAuthenticationStrategy, TokenPassThroughStrategy};
pub use client_credentials::ClientCredentialsStrategy;
pub use manager::{RouteAuthManager, StrategyContext, StrategyRegistry};
pub use on_behalf_of::OnBehalfOfStrategy;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};

use crate::config::{OpenIdSettings, RouteAuthenticationSettings};
use crate::service::SessionTokens;
use crate::{Error, Result};

/// A pluggable algorithm for attaching backend-specific proof of identity to
/// an outbound call
#[async_trait]
pub trait RouteAuthStrategy: Send + Sync {
    /// Configured strategy name.
    fn name(&self) -> &'static str;

    /// One-time setup from configuration. Resolves required options (route
    /// level first, gateway level as fallback) and performs discovery when
    /// the strategy owns its own authority.
    ///
    /// # Errors
    ///
    /// [`Error::MissingConfiguration`] naming the unresolvable option.
    async fn initialize(
        &self,
        gateway: &OpenIdSettings,
        route: &RouteAuthenticationSettings,
    ) -> Result<()>;

    /// Attach a bearer credential (or nothing, for the no-op and
    /// ensure-only strategies) to the outbound request headers.
    ///
    /// # Errors
    ///
    /// [`Error::NotInitialized`] when called before [`initialize`]
    /// completed; otherwise whatever the underlying token resolution or
    /// grant exchange fails with.
    ///
    /// [`initialize`]: RouteAuthStrategy::initialize
    async fn apply(&self, session: &SessionTokens, headers: &mut HeaderMap) -> Result<()>;
}

/// Set the `Authorization: Bearer ...` header.
pub(crate) fn set_bearer(headers: &mut HeaderMap, token: &str) -> Result<()> {
    let value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| Error::Internal(format!("Access token is not a valid header value: {e}")))?;
    headers.insert(AUTHORIZATION, value);
    Ok(())
}

/// Resolve a strategy option from the route map, falling back to a
/// gateway-level value, failing with the option's name.
pub(crate) fn require_option(
    strategy: &'static str,
    route: &RouteAuthenticationSettings,
    key: &'static str,
    gateway_fallback: Option<&str>,
) -> Result<String> {
    route
        .option(key)
        .filter(|v| !v.is_empty())
        .or(gateway_fallback.filter(|v| !v.is_empty()))
        .map(ToString::to_string)
        .ok_or(Error::MissingConfiguration {
            strategy,
            option: key,
        })
}
