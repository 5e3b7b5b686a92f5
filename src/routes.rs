//! Application routing configuration with middleware stack.
//!
//! # Global Middleware (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Sets and propagates X-Request-Id
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Body Limit     │ ← 413 if exceeded
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Panic Boundary  │ ← Opaque 500 JSON
//! └────────┬─────────┘
//!          ▼
//!   Route policy stages (see `middleware::pipeline`) → Handler
//! ```

use std::any::Any;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::ErrorBody;
use crate::handlers;
use crate::middleware::pipeline::{DOWNLOAD, GENERATE, HEALTH, LIST};
use crate::middleware::{RateLimitError, StageLayers};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// # Errors
///
/// Returns `RateLimitError` if rate limiting configuration is invalid.
pub fn build_router(state: AppState) -> Result<Router, RateLimitError> {
    let config = &state.config;
    let layers = StageLayers::from_state(&state);

    info!(
        requests = config.rate_limit_requests,
        window_secs = config.rate_limit_window.as_secs(),
        cache_ttl_secs = config.cache_ttl.as_secs(),
        api_keys = state.auth.credential_count(),
        form_bypass = state.auth.form_bypass(),
        auth_failure_guard = config.auth_failure_guard_enabled(),
        trusted_proxies = config.trusted_proxies.len(),
        "Request governance configured"
    );

    let router = Router::new()
        .route("/health", HEALTH.apply(get(handlers::health_check), &layers)?)
        .route("/generate", GENERATE.apply(post(handlers::generate), &layers)?)
        .route("/download/{id}", DOWNLOAD.apply(get(handlers::download), &layers)?)
        .route("/list", LIST.apply(get(handlers::list_qr_codes), &layers)?)
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(DefaultBodyLimit::max(config.max_request_body_size))
        .layer(build_cors_layer(&config.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    Ok(router.with_state(state))
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        axum::Json(ErrorBody::new(StatusCode::NOT_FOUND, "Resource not found")),
    )
        .into_response()
}

/// Convert a handler panic into the generic 500 body.
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    error!(panic = %detail, "Handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        axum::Json(ErrorBody::internal()),
    )
        .into_response()
}

/// Build CORS layer from configuration.
///
/// `*` anywhere in the list allows any origin.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(AnyOrigin)
            .allow_methods(AnyOrigin)
            .allow_headers(AnyOrigin)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(AnyOrigin)
            .allow_headers(AnyOrigin)
    }
}
