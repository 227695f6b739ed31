//! OAuth2 grant exchanges
//!
//! One executor handles every grant this subsystem performs: strategies and
//! the token client differ only in the form parameters they POST to the
//! discovered token endpoint. A non-2xx grant response is logged with its
//! body and raised as [`Error::Upstream`]; it is never swallowed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::OpenIdSettings;
use crate::discovery::DiscoveryResolver;
use crate::{Error, Result};

/// JSON body of a successful token-endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct GrantResponse {
    /// Issued bearer access token
    pub access_token: String,
    /// Replacement refresh token (refresh grant only)
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Identity token, when the grant yields one
    #[serde(default)]
    pub id_token: Option<String>,
    /// Validity in seconds from the moment of issuance
    pub expires_in: u64,
}

impl GrantResponse {
    /// Absolute expiry instant for this grant, measured from now.
    ///
    /// A degenerate `expires_in` that would overflow the timestamp range
    /// saturates to the maximum representable instant instead of panicking.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.expires_in)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// POST a form-encoded grant to a token endpoint and parse the response.
pub(crate) async fn execute_grant(
    http: &Client,
    token_endpoint: &str,
    params: &[(&str, &str)],
) -> Result<GrantResponse> {
    let response = http.post(token_endpoint).form(params).send().await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(status = %status, body = %body, "Grant exchange failed");
        return Err(Error::Upstream {
            status: status.as_u16(),
            body,
        });
    }

    Ok(response.json().await?)
}

/// Executes grant exchanges against the gateway's configured authority
pub struct TokenClient {
    http: Client,
    discovery: Arc<DiscoveryResolver>,
    settings: OpenIdSettings,
}

impl TokenClient {
    /// Create a client bound to the gateway's OpenID settings.
    #[must_use]
    pub fn new(http: Client, discovery: Arc<DiscoveryResolver>, settings: OpenIdSettings) -> Self {
        Self {
            http,
            discovery,
            settings,
        }
    }

    /// Execute the refresh-token grant.
    ///
    /// Returns `Ok(None)` when the authorization server rejects the grant
    /// (4xx — "server said no", the signal that the session must
    /// re-authenticate). Network failures and 5xx responses propagate as
    /// errors: the server did not answer the question.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Option<GrantResponse>> {
        let endpoints = self.discovery.resolve(&self.settings.authority).await?;

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
        ];
        let response = self
            .http
            .post(&endpoints.token_endpoint)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            info!(status = %status, body = %body, "Authorization server rejected refresh grant");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Refresh grant failed");
            return Err(Error::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let grant: GrantResponse = response.json().await?;
        debug!(expires_in = grant.expires_in, "Refresh grant succeeded");
        Ok(Some(grant))
    }

    /// Authenticated GET against the discovered userinfo endpoint, returning
    /// the raw claims payload.
    pub async fn query_userinfo(&self, access_token: &str) -> Result<String> {
        let endpoints = self.discovery.resolve(&self.settings.authority).await?;
        let endpoint =
            endpoints
                .userinfo_endpoint
                .as_deref()
                .ok_or_else(|| Error::Discovery {
                    authority: self.settings.authority.clone(),
                    reason: "metadata document has no userinfo_endpoint".to_string(),
                })?;

        let response = self
            .http
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Userinfo query failed");
            return Err(Error::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.text().await?)
    }
}
