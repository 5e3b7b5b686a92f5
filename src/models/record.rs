use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored QR code.
///
/// Only the content is persisted; the image is regenerated from it on every
/// download, so the record stays small and the encoder stays the single
/// source of truth for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrRecord {
    /// Store-assigned id (positive, unique, never reused)
    pub id: i64,
    /// The encoded text
    pub content: String,
    /// Insert time, immutable
    pub created_at: DateTime<Utc>,
}
