//! Authority metadata discovery
//!
//! Fetches the OpenID Connect discovery document
//! (`/.well-known/openid-configuration`) for an authority and memoizes the
//! result for the lifetime of the process. Authorities are assumed static
//! for a deployment, so the cache is never invalidated; a failed fetch is
//! not cached and the next caller retries.

use std::sync::Arc;

use dashmap::DashMap;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::{Error, Result};

/// Authorization server endpoints needed by this subsystem
#[derive(Debug, Clone)]
pub struct DiscoveryDocument {
    /// Token endpoint URL (grant exchanges are POSTed here)
    pub token_endpoint: String,
    /// Userinfo endpoint URL, when the authority publishes one
    pub userinfo_endpoint: Option<String>,
}

/// Wire shape of the well-known document. Authorities publish many more
/// fields; everything this subsystem does not consume is ignored.
#[derive(Debug, Deserialize)]
struct WellKnownDocument {
    #[serde(default)]
    token_endpoint: Option<String>,
    #[serde(default)]
    userinfo_endpoint: Option<String>,
}

/// Fetch-once, memoize-forever resolver for authority metadata
pub struct DiscoveryResolver {
    http: Client,
    documents: DashMap<String, Arc<DiscoveryDocument>>,
    // Serializes cold fetches so concurrent first lookups of the same
    // authority produce a single network round trip.
    fetch_lock: Mutex<()>,
}

impl DiscoveryResolver {
    /// Create a resolver sharing the given HTTP client.
    #[must_use]
    pub fn new(http: Client) -> Self {
        Self {
            http,
            documents: DashMap::new(),
            fetch_lock: Mutex::new(()),
        }
    }

    /// Resolve the discovery document for an authority.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`] if the well-known endpoint is
    /// unreachable, answers non-2xx, or publishes no token endpoint.
    pub async fn resolve(&self, authority: &str) -> Result<Arc<DiscoveryDocument>> {
        if let Some(doc) = self.documents.get(authority) {
            return Ok(Arc::clone(&doc));
        }

        let _guard = self.fetch_lock.lock().await;
        // Another caller may have populated the cache while we waited.
        if let Some(doc) = self.documents.get(authority) {
            return Ok(Arc::clone(&doc));
        }

        let doc = Arc::new(self.fetch(authority).await?);
        self.documents
            .insert(authority.to_string(), Arc::clone(&doc));
        Ok(doc)
    }

    async fn fetch(&self, authority: &str) -> Result<DiscoveryDocument> {
        Url::parse(authority).map_err(|e| Error::Discovery {
            authority: authority.to_string(),
            reason: format!("invalid authority URL: {e}"),
        })?;

        let url = format!(
            "{}/.well-known/openid-configuration",
            authority.trim_end_matches('/')
        );
        debug!(url = %url, "Fetching authority discovery document");

        let response = self.http.get(&url).send().await.map_err(|e| {
            Error::Discovery {
                authority: authority.to_string(),
                reason: format!("metadata endpoint unreachable: {e}"),
            }
        })?;

        if !response.status().is_success() {
            return Err(Error::Discovery {
                authority: authority.to_string(),
                reason: format!("metadata endpoint returned HTTP {}", response.status()),
            });
        }

        let wire: WellKnownDocument = response.json().await.map_err(|e| Error::Discovery {
            authority: authority.to_string(),
            reason: format!("invalid metadata document: {e}"),
        })?;

        let token_endpoint = wire.token_endpoint.ok_or_else(|| Error::Discovery {
            authority: authority.to_string(),
            reason: "metadata document has no token_endpoint".to_string(),
        })?;

        debug!(authority = %authority, token_endpoint = %token_endpoint, "Discovered authority");
        Ok(DiscoveryDocument {
            token_endpoint,
            userinfo_endpoint: wire.userinfo_endpoint,
        })
    }
}
