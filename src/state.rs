//! Shared application state for Axum handlers.
//!
//! This module provides thread-safe, clonable state that is shared across
//! all request handlers and route layers. It includes:
//!
//! - **Store**: persistence for QR records
//! - **Governor state**: the sliding-window limiter, the result cache and the
//!   credential gate shared by every route's pipeline
//! - **Configuration**: runtime configuration access
//!
//! # Structured Concurrency
//!
//! The eviction sweep runs under a `tokio_util::task::TaskTracker` and stops
//! on a `CancellationToken`. It is not started by [`AppState::new`]; call
//! [`AppState::spawn_background_tasks`] once the runtime is serving, and
//! `shutdown()` before exit.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::metrics;
use crate::middleware::{
    AuthFailureGuard, AuthGate, CredentialSet, ResponseCache, SlidingWindowLimiter,
    TrustedProxyConfig,
};
use crate::store::SharedStore;

/// Shared application state for Axum handlers.
///
/// Cloned for each request; everything inside is behind an `Arc`.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::new(store, config);
/// state.spawn_background_tasks();
/// // ... serve ...
/// state.shutdown().await;  // Wait for background tasks to complete
/// ```
#[derive(Clone)]
pub struct AppState {
    /// QR record persistence
    pub store: SharedStore,
    /// Application configuration
    pub config: Arc<Config>,
    /// Per-identity request windows, shared by all rate limited routes
    pub limiter: Arc<SlidingWindowLimiter>,
    /// Cached responses, shared by all cached routes
    pub cache: Arc<ResponseCache>,
    /// API key check
    pub auth: Arc<AuthGate>,
    /// Auth failure throttling (None when disabled)
    pub auth_failures: Option<Arc<AuthFailureGuard>>,
    /// Proxies whose forwarded-for headers are honored
    pub trusted_proxies: Arc<TrustedProxyConfig>,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create application state over an opened store.
    pub fn new(store: SharedStore, config: Config) -> Self {
        let auth = AuthGate::new(
            CredentialSet::new(config.api_keys.iter().cloned()),
            config.auth_form_bypass,
        );
        let auth_failures =
            AuthFailureGuard::new(config.auth_failure_limit_per_min, config.auth_failure_burst)
                .map(Arc::new);
        let trusted_proxies = TrustedProxyConfig::new(&config.trusted_proxies);

        Self {
            store,
            limiter: Arc::new(SlidingWindowLimiter::new()),
            cache: Arc::new(ResponseCache::new()),
            auth: Arc::new(auth),
            auth_failures,
            trusted_proxies: Arc::new(trusted_proxies),
            config: Arc::new(config),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start the periodic eviction sweep.
    pub fn spawn_background_tasks(&self) {
        self.spawn_sweep_task();
    }

    /// Run one eviction pass and refresh the size gauges.
    ///
    /// Returns `(rate windows removed, cache entries removed)`.
    pub fn sweep(&self) -> (usize, usize) {
        sweep_impl(
            &self.limiter,
            &self.cache,
            self.auth_failures.as_deref(),
            self.config.rate_limit_window,
            self.config.cache_ttl,
        )
    }

    fn spawn_sweep_task(&self) {
        let limiter = self.limiter.clone();
        let cache = self.cache.clone();
        let auth_failures = self.auth_failures.clone();
        let window = self.config.rate_limit_window;
        let ttl = self.config.cache_ttl;
        let period = self.config.sweep_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased; // Check cancellation first

                    _ = cancel.cancelled() => {
                        debug!("Sweep task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        sweep_impl(&limiter, &cache, auth_failures.as_deref(), window, ttl);
                    }
                }
            }

            debug!("Sweep task shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// Signals cancellation, closes the tracker and waits for every task.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }
}

fn sweep_impl(
    limiter: &SlidingWindowLimiter,
    cache: &ResponseCache,
    auth_failures: Option<&AuthFailureGuard>,
    window: Duration,
    ttl: Duration,
) -> (usize, usize) {
    let windows_removed = limiter.purge_stale(window);
    let entries_removed = cache.purge_expired(ttl);
    let lockouts_removed = auth_failures.map_or(0, AuthFailureGuard::purge_expired);

    metrics::set_tracked_identities(limiter.tracked_identities());
    metrics::set_cache_entries(cache.len());

    trace!(
        windows_removed,
        entries_removed,
        lockouts_removed,
        "Eviction sweep complete"
    );
    (windows_removed, entries_removed)
}
