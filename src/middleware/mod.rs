//! Request governance: the stages a request passes before reaching a handler.
//!
//! - **Rate Limiting**: sliding-window log per client identity
//! - **API Key Authentication**: constant-time allow-list check with a
//!   brute-force guard
//! - **Result Cache**: single-flight, time-bounded memoization of successful
//!   responses
//! - **Client Identity**: peer address with CIDR-validated proxy headers
//!
//! # Architecture
//!
//! ```text
//! Request → [Cache] → [Rate Limiter] → [Auth] → Handler → Response
//!              ↓            ↓             ↓
//!          cached 2xx   429 + Retry-After  401 Unauthorized
//! ```
//!
//! Which stages a route uses, and in what order, is declared in [`pipeline`].

pub mod auth;
pub mod cache;
pub mod ip;
pub mod pipeline;
pub mod rate_limit;

pub use auth::{
    API_KEY_HEADER, AuthFailureGuard, AuthGate, AuthLayer, CredentialSet,
    DEFAULT_AUTH_FAILURE_BURST,
};
pub use cache::{CacheKey, CacheLayer, CachedResponse, ResponseCache, ResultCache};
pub use ip::{TrustedProxyConfig, UNKNOWN_IP, client_identity};
pub use pipeline::{RoutePolicy, Stage, StageLayers};
pub use rate_limit::{Admission, RateLimitError, RateLimitLayer, SlidingWindowLimiter};
