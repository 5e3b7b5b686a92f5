//! Liveness endpoint.
//!
//! `GET /health` probes the store with a trivial query. It sits outside
//! every governance stage, so monitoring never needs a key and never spends
//! rate budget.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::{error, instrument};

use super::util::run_blocking;
use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint.
///
/// # Response Body
///
/// ```json
/// { "status": "healthy", "version": "0.1.0", "timestamp": "2024-01-15T10:30:00Z" }
/// ```
///
/// When the store probe fails the status is 500 and the body carries
/// `"status": "unhealthy"` plus an `error` string.
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store = state.store.clone();
    let probe = run_blocking(move || store.ping().map_err(Into::into)).await;

    let (status, label, error) = match probe {
        Ok(()) => (StatusCode::OK, "healthy", None),
        Err(e) => {
            error!(error = %e, "Health check failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "unhealthy", Some(e.to_string()))
        }
    };

    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
            error,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
        }),
    )
}
