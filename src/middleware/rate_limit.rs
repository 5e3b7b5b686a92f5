//! Per-client rate limiting with a sliding-window log.
//!
//! # Algorithm
//!
//! Each client identity owns an ordered log of the instants at which its
//! requests were admitted. On every check:
//!
//! 1. entries older than `window` are dropped;
//! 2. if `limit` entries remain the request is rejected and nothing is recorded;
//! 3. otherwise the current instant is appended and the request proceeds.
//!
//! A client that sends 5 requests under a 5/60s limit is rejected until the
//! first of those 5 is a full minute old.
//!
//! # Concurrency
//!
//! Windows live in a [`DashMap`] and each check runs while holding the
//! identity's entry, so prune/count/append is atomic per identity. N
//! concurrent requests from a fresh identity admit exactly `min(N, limit)`.
//!
//! # Memory
//!
//! Windows are created lazily and only pruned when their identity returns.
//! [`SlidingWindowLimiter::purge_stale`] drops identities whose log has fully
//! aged out; `AppState` runs it from the periodic sweep task.
//!
//! # Response Headers
//!
//! On rate limit exceeded (429):
//! - `Retry-After`: Seconds until the oldest logged request leaves the window
//! - `X-RateLimit-Limit`: Configured limit
//! - `X-RateLimit-Remaining`: Always `0`

use std::collections::VecDeque;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderValue, Request, Response};
use axum::response::IntoResponse;
use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::{TrustedProxyConfig, client_identity};
use crate::error::AppError;
use crate::metrics;

/// Header carrying the configured limit on 429 responses.
pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";

/// Header carrying the remaining budget on 429 responses.
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Error type for rate limit layer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("rate limit must allow at least one request per window")]
    ZeroLimit,
    #[error("rate limit window must be longer than zero")]
    ZeroWindow,
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request recorded; `remaining` more fit in the current window.
    Allowed { remaining: u32 },
    /// Window full; the earliest slot frees up after `retry_after`.
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

/// Sliding-window log keyed by client identity.
///
/// One instance is shared by every rate-limited route, so an identity has a
/// single budget across them. Each call supplies its own `limit` and `window`.
#[derive(Debug, Default)]
pub struct SlidingWindowLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check and record a request for `identity`.
    pub fn admit(&self, identity: &str, limit: u32, window: Duration) -> Admission {
        let now = Instant::now();
        let mut log = self.windows.entry(identity.to_string()).or_default();
        prune(&mut log, window, now);

        let limit_len = usize::try_from(limit).unwrap_or(usize::MAX);
        if log.len() >= limit_len {
            let retry_after = log
                .front()
                .map(|oldest| (*oldest + window).saturating_duration_since(now))
                .unwrap_or(window);
            return Admission::Rejected { retry_after };
        }

        log.push_back(now);
        let used = u32::try_from(log.len()).unwrap_or(u32::MAX);
        Admission::Allowed {
            remaining: limit.saturating_sub(used),
        }
    }

    /// Drop identities with no request inside `window`. Returns how many were removed.
    pub fn purge_stale(&self, window: Duration) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, log| {
            prune(log, window, now);
            !log.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    /// Number of identities currently holding a window.
    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }
}

fn prune(log: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    while let Some(oldest) = log.front() {
        if now.saturating_duration_since(*oldest) >= window {
            log.pop_front();
        } else {
            break;
        }
    }
}

/// Rate limiting layer for a single route.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = Arc::new(SlidingWindowLimiter::new());
/// let layer = RateLimitLayer::new(limiter, "generate", 5, Duration::from_secs(60), proxies)?;
/// let route = post(handler).layer(layer);
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<SlidingWindowLimiter>,
    route: &'static str,
    limit: u32,
    window: Duration,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    /// Create a rate limit layer over a shared limiter.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError`] if `limit` or `window` is zero.
    pub fn new(
        limiter: Arc<SlidingWindowLimiter>,
        route: &'static str,
        limit: u32,
        window: Duration,
        trusted_proxies: Arc<TrustedProxyConfig>,
    ) -> Result<Self, RateLimitError> {
        if limit == 0 {
            return Err(RateLimitError::ZeroLimit);
        }
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }

        Ok(Self {
            limiter,
            route,
            limit,
            window,
            trusted_proxies,
        })
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            layer: self.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    layer: RateLimitLayer,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let layer = &self.layer;
        let identity = client_identity(&req, &layer.trusted_proxies);

        match layer.limiter.admit(&identity, layer.limit, layer.window) {
            Admission::Allowed { remaining } => {
                debug!(client = %identity, route = layer.route, remaining, "Request admitted");
                let mut inner = self.inner.clone();
                Box::pin(async move { inner.call(req).await })
            }
            Admission::Rejected { retry_after } => {
                // Round up so clients never retry a moment too early
                let retry_after_secs = retry_after
                    .as_secs()
                    .saturating_add(u64::from(retry_after.subsec_nanos() > 0))
                    .max(1);

                warn!(
                    client = %identity,
                    route = layer.route,
                    retry_after_secs,
                    "Rate limit exceeded for client"
                );
                metrics::record_rate_limit_rejection(layer.route);

                let mut response = AppError::RateLimited { retry_after_secs }.into_response();
                let headers = response.headers_mut();
                headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(layer.limit));
                headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from_static("0"));

                Box::pin(async move { Ok(response) })
            }
        }
    }
}
