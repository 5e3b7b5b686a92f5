//! QR code endpoints.
//!
//! # Endpoints
//!
//! - `POST /generate` - Encode form field `content`, store it, return the PNG as base64
//! - `GET /download/{id}` - Re-render a stored record as a PNG attachment
//! - `GET /list` - Every stored record, newest first
//!
//! Store access and PNG rendering are synchronous and run on the blocking pool.

use std::time::Instant;

use axum::Json;
use axum::extract::rejection::FormRejection;
use axum::extract::{Form, Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use tracing::{debug, info, instrument, warn};

use super::util::run_blocking;
use crate::encoder::{encode_png, encode_png_base64};
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{GenerateForm, GenerateResponse, ListResponse};
use crate::state::AppState;
use crate::validation::{parse_record_id, validate_content};

/// Generate a QR code.
///
/// A body that cannot be read as a form is treated as an empty form, so it
/// fails validation with 400 like a missing `content` field.
#[instrument(skip(state, form))]
pub async fn generate(
    State(state): State<AppState>,
    form: Result<Form<GenerateForm>, FormRejection>,
) -> AppResult<Json<GenerateResponse>> {
    let form = form.map(|Form(form)| form).unwrap_or_else(|rejection| {
        debug!(%rejection, "Unreadable generate form");
        GenerateForm::default()
    });
    let content = validate_content(form.content.as_deref())?.to_owned();

    let store = state.store.clone();
    let (image, record) = run_blocking(move || {
        let started = Instant::now();
        let image = encode_png_base64(&content)?;
        metrics::record_encode_duration(started.elapsed().as_secs_f64());

        let record = store.insert(&content)?;
        Ok((image, record))
    })
    .await?;

    info!(id = record.id, "QR code generated");
    metrics::record_qr_generated();

    Ok(Json(GenerateResponse {
        image,
        id: record.id,
    }))
}

/// Download a stored QR code as `qrcode_{id}.png`.
#[instrument(skip(state))]
pub async fn download(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> AppResult<Response> {
    let id = parse_record_id(&raw_id).inspect_err(|_| {
        warn!(id = %raw_id, "Attempt to download non-existent QR code");
    })?;

    let store = state.store.clone();
    let png = run_blocking(move || {
        let Some(record) = store.get(id)? else {
            warn!(id, "Attempt to download non-existent QR code");
            return Err(AppError::NotFound("QR code not found".to_string()));
        };

        let started = Instant::now();
        let png = encode_png(&record.content)?;
        metrics::record_encode_duration(started.elapsed().as_secs_f64());
        Ok(png)
    })
    .await?;

    info!(id, "QR code downloaded");
    metrics::record_qr_downloaded();

    Ok((
        [
            (CONTENT_TYPE, "image/png".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"qrcode_{id}.png\""),
            ),
        ],
        png,
    )
        .into_response())
}

/// List every stored QR code.
#[instrument(skip(state))]
pub async fn list_qr_codes(State(state): State<AppState>) -> AppResult<Json<ListResponse>> {
    let store = state.store.clone();
    let qr_codes = run_blocking(move || store.list().map_err(Into::into)).await?;

    info!(count = qr_codes.len(), "QR code list retrieved");

    Ok(Json(ListResponse { qr_codes }))
}
