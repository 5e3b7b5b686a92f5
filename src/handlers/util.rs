//! Shared utilities for handlers.

use tokio::task;

use crate::error::{AppError, AppResult};

/// Run synchronous store or encoder work off the async executor.
///
/// A panicking or cancelled closure is reported as an internal error.
pub async fn run_blocking<T, F>(work: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::Internal(format!("blocking task failed: {e}")))?
}
