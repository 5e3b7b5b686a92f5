//! API key authentication middleware.
//!
//! Clients present a key in the `X-API-Key` header. The key must be a member
//! of the credential set loaded from `API_KEYS` at startup.
//!
//! ```bash
//! curl -H "X-API-Key: secret_key_1" http://localhost:8000/list
//! ```
//!
//! # Form-Encoded Requests
//!
//! A request whose `Content-Type` is `application/x-www-form-urlencoded` skips
//! the credential check entirely when `AUTH_FORM_BYPASS` is on (the default).
//! Browser form posts to `/generate` rely on this. Turning the setting off
//! makes every protected route require a key.
//!
//! # Brute Force Protection
//!
//! Opt-in via `AUTH_FAILURE_LIMIT_PER_MIN` (off by default). Failed attempts
//! are counted per client identity with a `governor` keyed limiter. Once an
//! identity exhausts its failure budget it is locked out and receives 429
//! before its key is examined, until the limiter would admit another attempt.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, Request, Response};
use axum::response::IntoResponse;
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use subtle::{Choice, ConstantTimeEq};
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{debug, error, warn};

use super::ip::{TrustedProxyConfig, client_identity};
use crate::error::{AppError, AppResult};
use crate::metrics;

/// Header name for API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Content type that bypasses the credential check when the carve-out is on.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Client-facing message for every credential rejection.
pub const INVALID_API_KEY: &str = "Invalid API key";

/// Default burst capacity for auth failure rate limiting.
pub const DEFAULT_AUTH_FAILURE_BURST: u32 = 5;

// =============================================================================
// Credential Set
// =============================================================================

/// Immutable allow-list of API keys.
#[derive(Debug, Clone, Default)]
pub struct CredentialSet {
    keys: Arc<Vec<String>>,
}

impl CredentialSet {
    /// Build from raw keys. Empty and duplicate keys are dropped.
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for key in keys.into_iter().map(Into::into) {
            if !key.is_empty() && !unique.contains(&key) {
                unique.push(key);
            }
        }
        Self {
            keys: Arc::new(unique),
        }
    }

    /// Membership test. Every key is compared in constant time and the scan
    /// never short-circuits.
    pub fn contains(&self, candidate: &str) -> bool {
        let mut found = Choice::from(0);
        for key in self.keys.iter() {
            found |= key.as_bytes().ct_eq(candidate.as_bytes());
        }
        found.into()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// =============================================================================
// AuthGate
// =============================================================================

/// Credential check shared by every protected route.
#[derive(Debug, Clone)]
pub struct AuthGate {
    credentials: CredentialSet,
    form_bypass: bool,
}

impl AuthGate {
    pub fn new(credentials: CredentialSet, form_bypass: bool) -> Self {
        Self {
            credentials,
            form_bypass,
        }
    }

    /// Accept a present, recognized credential; reject anything else with 401.
    pub fn authorize(&self, credential: Option<&str>) -> AppResult<()> {
        match credential {
            Some(key) if self.credentials.contains(key) => Ok(()),
            Some(key) => {
                warn!(api_key = %key, "Invalid API key used");
                metrics::record_auth_rejection("invalid");
                Err(AppError::Unauthorized(INVALID_API_KEY.to_string()))
            }
            None => {
                warn!(api_key = "<none>", "Invalid API key used");
                metrics::record_auth_rejection("missing");
                Err(AppError::Unauthorized(INVALID_API_KEY.to_string()))
            }
        }
    }

    /// Whether a request with this `Content-Type` skips the credential check.
    ///
    /// Only the media type essence is compared; parameters such as `charset`
    /// are ignored.
    pub fn bypasses(&self, content_type: Option<&str>) -> bool {
        self.form_bypass
            && content_type
                .and_then(|value| value.split(';').next())
                .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE))
    }

    pub fn form_bypass(&self) -> bool {
        self.form_bypass
    }

    pub fn credential_count(&self) -> usize {
        self.credentials.len()
    }
}

// =============================================================================
// Failure Guard
// =============================================================================

type FailureLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Per-identity limit on failed authentication attempts.
pub struct AuthFailureGuard {
    limiter: FailureLimiter,
    clock: DefaultClock,
    lockouts: DashMap<String, Instant>,
}

impl AuthFailureGuard {
    /// `None` when `per_minute` is zero (guard disabled).
    pub fn new(per_minute: u32, burst: u32) -> Option<Self> {
        let per_minute = NonZeroU32::new(per_minute)?;
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(per_minute).allow_burst(burst);

        Some(Self {
            limiter: RateLimiter::keyed(quota),
            clock: DefaultClock::default(),
            lockouts: DashMap::new(),
        })
    }

    /// Remaining lockout for `identity`, if any.
    pub fn locked_out(&self, identity: &str) -> Option<Duration> {
        let now = Instant::now();
        let until = self.lockouts.get(identity).map(|entry| *entry.value())?;
        if until > now {
            Some(until - now)
        } else {
            self.lockouts.remove_if(identity, |_, until| *until <= now);
            None
        }
    }

    /// Count one failure. Returns the lockout it triggered, if the budget is spent.
    pub fn record_failure(&self, identity: &str) -> Option<Duration> {
        let key = identity.to_string();
        match self.limiter.check_key(&key) {
            Ok(()) => None,
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                self.lockouts.insert(key, Instant::now() + wait);
                Some(wait)
            }
        }
    }

    /// Drop expired lockouts and idle limiter state.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.lockouts.len();
        self.lockouts.retain(|_, until| *until > now);
        self.limiter.retain_recent();
        before.saturating_sub(self.lockouts.len())
    }
}

impl std::fmt::Debug for AuthFailureGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthFailureGuard")
            .field("lockouts", &self.lockouts.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// HTTP Layer
// =============================================================================

/// API key authentication layer.
#[derive(Clone)]
pub struct AuthLayer {
    gate: Arc<AuthGate>,
    failure_guard: Option<Arc<AuthFailureGuard>>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl AuthLayer {
    pub fn new(
        gate: Arc<AuthGate>,
        failure_guard: Option<Arc<AuthFailureGuard>>,
        trusted_proxies: Arc<TrustedProxyConfig>,
    ) -> Self {
        Self {
            gate,
            failure_guard,
            trusted_proxies,
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            layer: self.clone(),
        }
    }
}

/// API key authentication service wrapper.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    layer: AuthLayer,
}

impl<S> Service<Request<Body>> for AuthService<S>
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
        let content_type = req.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok());

        if layer.gate.bypasses(content_type) {
            debug!(path = %req.uri().path(), "Skipping API key check for form-encoded request");
            let mut inner = self.inner.clone();
            return Box::pin(async move { inner.call(req).await });
        }

        let identity = client_identity(&req, &layer.trusted_proxies);

        if let Some(guard) = &layer.failure_guard
            && let Some(remaining) = guard.locked_out(&identity)
        {
            let retry_after_secs = remaining.as_secs().max(1);
            error!(
                client = %identity,
                retry_after_secs,
                "Client blocked due to excessive auth failures"
            );
            metrics::record_auth_rejection("locked_out");
            let response = AppError::RateLimited { retry_after_secs }.into_response();
            return Box::pin(async move { Ok(response) });
        }

        // Non-UTF-8 keys still count as presented (and fail)
        let credential = req
            .headers()
            .get(API_KEY_HEADER)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

        match layer.gate.authorize(credential.as_deref()) {
            Ok(()) => {
                debug!(client = %identity, "API key authentication successful");
                let mut inner = self.inner.clone();
                Box::pin(async move { inner.call(req).await })
            }
            Err(err) => {
                warn!(
                    client = %identity,
                    path = %req.uri().path(),
                    "Rejected unauthenticated request"
                );
                if let Some(guard) = &layer.failure_guard
                    && let Some(lockout) = guard.record_failure(&identity)
                {
                    warn!(
                        client = %identity,
                        lockout_secs = lockout.as_secs(),
                        "Auth failure budget exhausted, locking out client"
                    );
                }

                let mut response = err.into_response();
                response
                    .headers_mut()
                    .insert(WWW_AUTHENTICATE, HeaderValue::from_static("API-Key"));
                Box::pin(async move { Ok(response) })
            }
        }
    }
}
