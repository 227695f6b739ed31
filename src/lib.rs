//! Gateway identity layer
//!
//! Manages OAuth2/OIDC-derived tokens tied to a browser session, refreshes
//! them transparently before they expire, and produces correctly
//! authenticated outbound requests using one of several per-route trust
//! strategies.
//!
//! # Components
//!
//! - [`discovery::DiscoveryResolver`] — authority metadata, fetched once and
//!   memoized for the process lifetime
//! - [`store`] — per-session [`store::TokenRecord`] storage (in-memory,
//!   file-backed, or cached-over-durable)
//! - [`grants::TokenClient`] — refresh-token grant and userinfo queries
//! - [`service::TokenService`] — session-scoped access-token resolution with
//!   a 30-second expiry guard and collapsed concurrent refreshes
//! - [`routes`] — pluggable per-route authentication strategies plus the
//!   registry/manager that owns them
//! - [`sweeper`] — recurring cleanup of expired token records
//!
//! A [`Error::TokenRefreshFailed`] surfacing through the request pipeline
//! must translate into a fresh interactive login challenge at the HTTP
//! boundary (see [`Error::status_code`]), never a generic 5xx.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod grants;
pub mod routes;
pub mod service;
pub mod store;
pub mod sweeper;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
