mod health;
mod qr;
mod util;

pub use health::health_check;
pub use qr::{download, generate, list_qr_codes};
