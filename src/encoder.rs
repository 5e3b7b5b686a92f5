//! QR code rendering.
//!
//! A pure function from content to PNG bytes. Downloads regenerate the image
//! from stored content, so the output for a given input must be stable.

use std::io::Cursor;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, Luma};
use qrcode::QrCode;
use qrcode::types::QrError;
use thiserror::Error;

/// Errors produced while encoding content.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Content exceeds the capacity of the largest QR version.
    #[error("Content is too long to encode as a QR code")]
    ContentTooLong,
    /// QR construction or PNG encoding failed.
    #[error("failed to render QR code: {0}")]
    Render(String),
}

/// Render `content` as a PNG-encoded QR code (error correction level M,
/// quiet zone included).
pub fn encode_png(content: &str) -> Result<Vec<u8>, EncodeError> {
    let code = QrCode::new(content.as_bytes()).map_err(|e| match e {
        QrError::DataTooLong => EncodeError::ContentTooLong,
        other => EncodeError::Render(other.to_string()),
    })?;

    let image = code.render::<Luma<u8>>().build();

    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| EncodeError::Render(e.to_string()))?;

    Ok(png)
}

/// Render `content` and return the PNG as standard base64.
pub fn encode_png_base64(content: &str) -> Result<String, EncodeError> {
    encode_png(content).map(|png| STANDARD.encode(png))
}
