//! # QR Service
//!
//! An HTTP service that turns text into QR code images, persists what it
//! encoded, and serves the images back on demand. Every protected route runs
//! behind an in-process request governor:
//!
//! - **Authentication**: static API key allow-list, constant-time comparison
//! - **Rate Limiting**: per-client sliding window (5 requests / 60 s by default)
//! - **Result Cache**: single-flight, 60 s memoization of downloads
//! - **Observability**: request IDs, structured logging, optional Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Global layers (Request ID → Trace → CORS → Body Limit)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Route policy stages (Cache → Rate Limit → Auth)            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, generate, download, list)                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Encoder (qrcode + PNG)        │  Store (SQLite)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use qr_service::{AppState, Config, SqliteStore, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(SqliteStore::open(&config.db_name)?);
//!
//!     let state = AppState::new(store, config);
//!     state.spawn_background_tasks();
//!     let app = build_router(state)?;
//!
//!     // Serve with `into_make_service_with_connect_info::<SocketAddr>()`...
//!     Ok(())
//! }
//! ```
//!
//! ## Security Configuration
//!
//! ```bash
//! API_KEYS=key-one,key-two AUTH_FORM_BYPASS=false cargo run
//! ```

pub mod config;
pub mod encoder;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use state::AppState;
pub use store::{QrStore, SharedStore, SqliteStore};
