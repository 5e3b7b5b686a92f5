use tracing::warn;

use crate::error::{AppError, AppResult};

/// Message returned when generate is called without usable content.
pub const CONTENT_REQUIRED: &str = "Content is required";

/// Validate content submitted for QR generation.
///
/// Rules:
/// - Must be present
/// - Must contain at least one non-whitespace character
///
/// The content is returned unchanged; surrounding whitespace is part of
/// what gets encoded. Capacity limits are enforced by the encoder.
pub fn validate_content(content: Option<&str>) -> AppResult<&str> {
    match content {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => {
            warn!("Attempt to generate QR code with empty content");
            Err(AppError::Validation(CONTENT_REQUIRED.to_string()))
        }
    }
}

/// Parse a download id path segment.
///
/// Anything that is not a positive integer cannot name a record, so it is
/// reported as not found rather than as a malformed request.
pub fn parse_record_id(raw: &str) -> AppResult<i64> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(AppError::NotFound("QR code not found".to_string())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_content() {
        assert_eq!(validate_content(Some("hello")).unwrap(), "hello");
    }

    #[test]
    fn test_content_keeps_surrounding_whitespace() {
        assert_eq!(validate_content(Some("  padded ")).unwrap(), "  padded ");
    }

    #[test]
    fn test_missing_content() {
        let err = validate_content(None).unwrap_err();
        assert!(matches!(err, AppError::Validation(msg) if msg == CONTENT_REQUIRED));
    }

    #[test]
    fn test_empty_content() {
        assert!(validate_content(Some("")).is_err());
    }

    #[test]
    fn test_whitespace_only_content() {
        assert!(validate_content(Some(" \t\n ")).is_err());
    }

    #[test]
    fn test_parse_record_id() {
        assert_eq!(parse_record_id("42").unwrap(), 42);
        assert!(matches!(parse_record_id("0"), Err(AppError::NotFound(_))));
        assert!(matches!(parse_record_id("-3"), Err(AppError::NotFound(_))));
        assert!(matches!(parse_record_id("abc"), Err(AppError::NotFound(_))));
        assert!(matches!(
            parse_record_id("99999999999999999999"),
            Err(AppError::NotFound(_))
        ));
    }
}
