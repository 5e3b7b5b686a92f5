//! Fuzz testing for the QR encoder.
//!
//! Any byte string that fits in a QR code must render to a PNG; anything
//! else must be reported as an error, never a panic.
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_encoder -- -max_len=4096
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use qr_service::encoder::{EncodeError, encode_png};

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    match encode_png(s) {
        Ok(png) => assert!(png.starts_with(&PNG_SIGNATURE)),
        Err(EncodeError::ContentTooLong) => assert!(s.len() > 2_000),
        Err(EncodeError::Render(_)) => {}
    }
});
