//! Per-route stage ordering.
//!
//! Each route declares the stages it passes through as a [`RoutePolicy`],
//! listed in request order: the first stage sees the request first and can
//! short-circuit everything after it.
//!
//! | Route | Stages |
//! |-------|--------|
//! | `POST /generate` | RateLimit → Auth |
//! | `GET /download/{id}` | Cache → RateLimit → Auth |
//! | `GET /list` | Auth |
//! | `GET /health` | none |
//!
//! Because the cache sits in front of the download route, a cache hit is
//! served without consuming rate budget and without a credential check.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::MethodRouter;

use super::auth::{AuthFailureGuard, AuthGate, AuthLayer};
use super::cache::{CacheLayer, ResponseCache};
use super::ip::TrustedProxyConfig;
use super::rate_limit::{RateLimitError, RateLimitLayer, SlidingWindowLimiter};
use crate::state::AppState;

/// A governance stage a route can pass through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    RateLimit,
    Auth,
    Cache,
}

/// Ordered stages for one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutePolicy {
    /// Route name used in logs, metric labels and cache keys.
    pub name: &'static str,
    /// Stages in request order.
    pub stages: &'static [Stage],
}

pub const GENERATE: RoutePolicy = RoutePolicy {
    name: "generate",
    stages: &[Stage::RateLimit, Stage::Auth],
};

pub const DOWNLOAD: RoutePolicy = RoutePolicy {
    name: "download",
    stages: &[Stage::Cache, Stage::RateLimit, Stage::Auth],
};

pub const LIST: RoutePolicy = RoutePolicy {
    name: "list",
    stages: &[Stage::Auth],
};

pub const HEALTH: RoutePolicy = RoutePolicy {
    name: "health",
    stages: &[],
};

/// The shared stage state every policy draws its layers from.
#[derive(Clone)]
pub struct StageLayers {
    limiter: Arc<SlidingWindowLimiter>,
    rate_limit: u32,
    rate_window: Duration,
    cache: Arc<ResponseCache>,
    cache_ttl: Duration,
    cache_max_body_bytes: usize,
    auth: Arc<AuthGate>,
    auth_failures: Option<Arc<AuthFailureGuard>>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl StageLayers {
    pub fn from_state(state: &AppState) -> Self {
        Self {
            limiter: state.limiter.clone(),
            rate_limit: state.config.rate_limit_requests,
            rate_window: state.config.rate_limit_window,
            cache: state.cache.clone(),
            cache_ttl: state.config.cache_ttl,
            cache_max_body_bytes: state.config.cache_max_body_bytes,
            auth: state.auth.clone(),
            auth_failures: state.auth_failures.clone(),
            trusted_proxies: state.trusted_proxies.clone(),
        }
    }

    fn rate_limit(&self, route: &'static str) -> Result<RateLimitLayer, RateLimitError> {
        RateLimitLayer::new(
            self.limiter.clone(),
            route,
            self.rate_limit,
            self.rate_window,
            self.trusted_proxies.clone(),
        )
    }

    fn auth(&self) -> AuthLayer {
        AuthLayer::new(
            self.auth.clone(),
            self.auth_failures.clone(),
            self.trusted_proxies.clone(),
        )
    }

    fn cache(&self, operation: &'static str) -> CacheLayer {
        CacheLayer::new(
            self.cache.clone(),
            operation,
            self.cache_ttl,
            self.cache_max_body_bytes,
        )
    }
}

impl RoutePolicy {
    /// Wrap `route` in this policy's stages.
    ///
    /// Layers are applied innermost first, so the first listed stage ends up
    /// outermost and runs first.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError`] if the configured rate limit is invalid.
    pub fn apply(
        &self,
        route: MethodRouter<AppState>,
        layers: &StageLayers,
    ) -> Result<MethodRouter<AppState>, RateLimitError> {
        let mut route = route;
        for stage in self.stages.iter().rev() {
            route = match stage {
                Stage::RateLimit => route.layer(layers.rate_limit(self.name)?),
                Stage::Auth => route.layer(layers.auth()),
                Stage::Cache => route.layer(layers.cache(self.name)),
            };
        }
        Ok(route)
    }

    pub fn has(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }
}
