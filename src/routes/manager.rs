//! Strategy registry and per-route strategy manager
//!
//! The registry is an explicit value owned by the composition root — a map
//! from strategy name to constructor — with no ambient global state. The
//! manager resolves the strategy configured for a route, runs its one-time
//! initialization, and memoizes the initialized *instance* per route name:
//! two routes using the same strategy type get independent instances and
//! independent grant caches.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    ClientCredentialsStrategy, EnsureAuthenticatedStrategy, NoAuthenticationStrategy,
    OnBehalfOfStrategy, RouteAuthStrategy, TokenPassThroughStrategy,
};
use crate::config::{OpenIdSettings, RouteAuthenticationSettings};
use crate::discovery::DiscoveryResolver;
use crate::{Error, Result};

/// Shared collaborators a strategy constructor may need
#[derive(Clone)]
pub struct StrategyContext {
    /// HTTP client shared across the gateway
    pub http: Client,
    /// Process-wide discovery resolver
    pub discovery: Arc<DiscoveryResolver>,
}

type StrategyFactory = Box<dyn Fn(&StrategyContext) -> Arc<dyn RouteAuthStrategy> + Send + Sync>;

/// Map from strategy name to constructor
#[derive(Default)]
pub struct StrategyRegistry {
    factories: HashMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with every built-in strategy.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("None", |_| Arc::new(NoAuthenticationStrategy));
        registry.register("EnsureAuthenticated", |_| {
            Arc::new(EnsureAuthenticatedStrategy)
        });
        registry.register("TokenPassThrough", |_| Arc::new(TokenPassThroughStrategy));
        registry.register("ClientCredentials", |ctx| {
            Arc::new(ClientCredentialsStrategy::new(
                ctx.http.clone(),
                Arc::clone(&ctx.discovery),
            ))
        });
        registry.register("Auth0ClientCredentialsOnly", |ctx| {
            Arc::new(ClientCredentialsStrategy::auth0(
                ctx.http.clone(),
                Arc::clone(&ctx.discovery),
            ))
        });
        registry.register("AzureOnBehalfOf", |ctx| {
            Arc::new(OnBehalfOfStrategy::new(
                ctx.http.clone(),
                Arc::clone(&ctx.discovery),
            ))
        });
        registry
    }

    /// Register (or replace) a strategy constructor under a name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&StrategyContext) -> Arc<dyn RouteAuthStrategy> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    fn get(&self, name: &str) -> Option<&StrategyFactory> {
        self.factories.get(name)
    }

    /// Registered strategy names, for diagnostics.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

/// Resolves, lazily constructs, and caches one strategy instance per route
pub struct RouteAuthManager {
    registry: StrategyRegistry,
    ctx: StrategyContext,
    gateway: OpenIdSettings,
    routes: HashMap<String, RouteAuthenticationSettings>,
    instances: DashMap<String, Arc<dyn RouteAuthStrategy>>,
    // Serializes first-use construction so one initialized instance wins.
    init_lock: Mutex<()>,
}

impl RouteAuthManager {
    /// Create a manager over the given registry and route configuration.
    #[must_use]
    pub fn new(
        registry: StrategyRegistry,
        ctx: StrategyContext,
        gateway: OpenIdSettings,
        routes: HashMap<String, RouteAuthenticationSettings>,
    ) -> Self {
        Self {
            registry,
            ctx,
            gateway,
            routes,
            instances: DashMap::new(),
            init_lock: Mutex::new(()),
        }
    }

    /// Resolve the initialized strategy instance for a route.
    ///
    /// Routes without authentication settings resolve to the no-op strategy.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownStrategy`] when the configured name has no registered
    /// implementation; otherwise whatever the strategy's initialization
    /// fails with (configuration errors fail fast and are not cached).
    pub async fn resolve(&self, route_name: &str) -> Result<Arc<dyn RouteAuthStrategy>> {
        if let Some(instance) = self.instances.get(route_name) {
            return Ok(Arc::clone(&instance));
        }

        let _guard = self.init_lock.lock().await;
        if let Some(instance) = self.instances.get(route_name) {
            return Ok(Arc::clone(&instance));
        }

        let default_settings = RouteAuthenticationSettings {
            strategy: "None".to_string(),
            options: HashMap::new(),
        };
        let settings = self.routes.get(route_name).unwrap_or(&default_settings);

        let factory = self
            .registry
            .get(&settings.strategy)
            .ok_or_else(|| Error::UnknownStrategy(settings.strategy.clone()))?;

        let strategy = factory(&self.ctx);
        strategy.initialize(&self.gateway, settings).await?;
        self.instances
            .insert(route_name.to_string(), Arc::clone(&strategy));

        debug!(route = %route_name, strategy = %settings.strategy, "Initialized route authentication strategy");
        Ok(strategy)
    }
}
