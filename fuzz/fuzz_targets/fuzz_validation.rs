//! Fuzz testing for request input validation.
//!
//! Validation runs on untrusted form fields and path segments, so it must
//! never panic and must agree with its own contract on every input.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_validation -- -max_total_time=60
//! ```
//!
//! # What This Tests
//!
//! - `validate_content`: accepted content always has a non-whitespace character
//! - `parse_record_id`: accepted ids are always positive

#![no_main]

use libfuzzer_sys::fuzz_target;
use qr_service::validation::{parse_record_id, validate_content};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(content) = validate_content(Some(s)) {
        assert_eq!(content, s);
        assert!(!content.trim().is_empty());
    }

    if let Ok(id) = parse_record_id(s) {
        assert!(id > 0);
    }
});
