//! Error types for the gateway identity layer

use std::io;

use thiserror::Error;

/// Result type alias for the gateway identity layer
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway identity errors
#[derive(Error, Debug)]
pub enum Error {
    /// No session is bound to the current request
    #[error("No session bound to this request")]
    NoSession,

    /// The session id is not present in the token store
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// The session is bound but has no token record
    #[error("No token record for session: {0}")]
    NoTokenForSession(String),

    /// The authorization server rejected or could not complete a refresh.
    /// Callers must treat this as "force re-authentication", not a generic
    /// failure.
    #[error("Token refresh rejected by the authorization server")]
    TokenRefreshFailed,

    /// Authority metadata could not be fetched or was incomplete
    #[error("Discovery failed for authority {authority}: {reason}")]
    Discovery {
        /// Authority URL the lookup was performed against
        authority: String,
        /// What went wrong
        reason: String,
    },

    /// A strategy option is missing from both route and gateway settings
    #[error("Strategy {strategy} is missing required option: {option}")]
    MissingConfiguration {
        /// Strategy name as configured
        strategy: &'static str,
        /// The option key that could not be resolved
        option: &'static str,
    },

    /// A route names a strategy with no registered implementation
    #[error("Unknown authentication strategy: {0}")]
    UnknownStrategy(String),

    /// A strategy was applied before its one-time initialization
    #[error("Strategy {0} used before initialization")]
    NotInitialized(&'static str),

    /// The authorization server answered a grant or userinfo request with a
    /// non-2xx status. The response body is captured for diagnostics.
    #[error("Authorization server returned HTTP {status}: {body}")]
    Upstream {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this failure must surface as an interactive login challenge
    /// rather than a server error.
    #[must_use]
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::NoSession | Self::TokenRefreshFailed)
    }

    /// Map to the HTTP status code used at the request boundary.
    ///
    /// `NoSession` and `TokenRefreshFailed` become a 401 challenge; anything
    /// else indicates gateway misconfiguration and maps to 500.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        if self.requires_login() { 401 } else { 500 }
    }
}
