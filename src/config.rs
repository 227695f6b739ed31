//! Configuration management
//!
//! Settings are loaded from a YAML file merged with `GATEWAY_`-prefixed
//! environment variables. Strategy-specific options live in an open
//! string-to-string map per route; each strategy resolves its own typed
//! option struct once, at initialization, falling back from route-level to
//! gateway-level values where that makes sense.

use std::{collections::HashMap, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration for the identity layer
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// OpenID Connect settings shared by the whole gateway
    pub openid: OpenIdSettings,
    /// Session token housekeeping
    pub session: SessionConfig,
    /// Per-route authentication settings, keyed by route name.
    /// Routes without an entry get no backend authentication.
    pub routes: HashMap<String, RouteAuthenticationSettings>,
}

/// Gateway-wide OpenID Connect settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OpenIdSettings {
    /// Authority base URL (issuer); discovery is performed against
    /// `{authority}/.well-known/openid-configuration`
    pub authority: String,
    /// OAuth client id registered at the authority
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Scope requested by default (space separated)
    pub scope: String,
    /// Fetch and persist userinfo claims immediately after login
    pub query_userinfo_at_login: bool,
}

/// Session token housekeeping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How often the expiry sweeper purges expired token records
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(15 * 60),
        }
    }
}

/// Authentication settings for one route
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RouteAuthenticationSettings {
    /// Strategy name selecting an implementation (e.g. `TokenPassThrough`,
    /// `ClientCredentials`, `AzureOnBehalfOf`)
    pub strategy: String,
    /// Strategy-specific options (`ClientId`, `ClientSecret`, `Scope`,
    /// `Authority`, `Audience`, ...)
    pub options: HashMap<String, String>,
}

impl RouteAuthenticationSettings {
    /// Look up an option by key.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("GATEWAY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate settings that every deployment needs.
    ///
    /// Strategy options are validated lazily by each strategy's own
    /// initialization; only the gateway-wide OpenID block is checked here.
    fn validate(&self) -> Result<()> {
        if self.openid.authority.is_empty() {
            return Err(Error::Config("openid.authority must be set".to_string()));
        }
        if self.openid.client_id.is_empty() {
            return Err(Error::Config("openid.client_id must be set".to_string()));
        }
        Ok(())
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "15m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
