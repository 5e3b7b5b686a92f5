use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::QrRecord;

/// Form body for `POST /generate`.
///
/// `content` is optional at the type level so a missing field is reported
/// as a validation error rather than a deserialization failure.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateForm {
    #[serde(default)]
    pub content: Option<String>,
}

/// Response after generating a QR code.
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Base64-encoded PNG
    pub image: String,
    /// Id of the stored record
    pub id: i64,
}

/// Response for `GET /list`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub qr_codes: Vec<QrRecord>,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" or "unhealthy"
    pub status: String,
    /// Store failure, only present when unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Service version
    pub version: String,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}
