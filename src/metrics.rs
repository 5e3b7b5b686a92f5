//! Prometheus metrics for application observability.
//!
//! Metrics are exposed on a dedicated listener when `METRICS_PORT` is set.
//! Without an installed exporter every recording function is a no-op.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `qr_codes_generated_total` - QR codes created
//! - `qr_codes_downloaded_total` - PNG downloads served by the handler (cache hits excluded)
//! - `rate_limit_rejections_total` - Requests refused by the rate limiter (label: route)
//! - `auth_rejections_total` - Credential rejections (label: reason)
//! - `cache_lookups_total` - Result cache lookups (labels: operation, outcome)
//!
//! ## Histograms
//! - `qr_encode_duration_seconds` - Time spent rendering a QR code to PNG
//!
//! ## Gauges
//! - `rate_limit_tracked_identities` - Identities with a request window
//! - `cache_entries` - Slots held by the result cache
//!
//! # Usage
//!
//! ```rust,ignore
//! use qr_service::metrics::{try_init_metrics, record_qr_generated};
//!
//! try_init_metrics("0.0.0.0:9090".parse()?);
//! record_qr_generated();
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const QR_CODES_GENERATED_TOTAL: &str = "qr_codes_generated_total";
    pub const QR_CODES_DOWNLOADED_TOTAL: &str = "qr_codes_downloaded_total";
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "rate_limit_rejections_total";
    pub const AUTH_REJECTIONS_TOTAL: &str = "auth_rejections_total";
    pub const CACHE_LOOKUPS_TOTAL: &str = "cache_lookups_total";
    pub const QR_ENCODE_DURATION_SECONDS: &str = "qr_encode_duration_seconds";
    pub const RATE_LIMIT_TRACKED_IDENTITIES: &str = "rate_limit_tracked_identities";
    pub const CACHE_ENTRIES: &str = "cache_entries";
}

/// Install the Prometheus exporter and describe all metrics.
///
/// # Errors
///
/// Fails if the listener cannot be bound or a recorder is already installed.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(names::QR_CODES_GENERATED_TOTAL, "Total number of QR codes generated");
    describe_counter!(
        names::QR_CODES_DOWNLOADED_TOTAL,
        "Total number of QR code images rendered for download"
    );
    describe_counter!(
        names::RATE_LIMIT_REJECTIONS_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_counter!(
        names::AUTH_REJECTIONS_TOTAL,
        "Total number of requests rejected by API key authentication"
    );
    describe_counter!(names::CACHE_LOOKUPS_TOTAL, "Total number of result cache lookups");

    describe_histogram!(
        names::QR_ENCODE_DURATION_SECONDS,
        "QR code PNG rendering duration in seconds"
    );

    describe_gauge!(
        names::RATE_LIMIT_TRACKED_IDENTITIES,
        "Client identities currently tracked by the rate limiter"
    );
    describe_gauge!(names::CACHE_ENTRIES, "Entries currently held by the result cache");

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counters
// =============================================================================

pub fn record_qr_generated() {
    counter!(names::QR_CODES_GENERATED_TOTAL).increment(1);
}

pub fn record_qr_downloaded() {
    counter!(names::QR_CODES_DOWNLOADED_TOTAL).increment(1);
}

/// Record a request refused by the rate limiter on `route`.
pub fn record_rate_limit_rejection(route: &'static str) {
    counter!(names::RATE_LIMIT_REJECTIONS_TOTAL, "route" => route).increment(1);
}

/// Record an auth rejection. Reasons: `missing`, `invalid`, `locked_out`.
pub fn record_auth_rejection(reason: &'static str) {
    counter!(names::AUTH_REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

/// Record a cache lookup. Outcomes: `hit`, `miss`.
pub fn record_cache_lookup(operation: &'static str, outcome: &'static str) {
    counter!(names::CACHE_LOOKUPS_TOTAL, "operation" => operation, "outcome" => outcome)
        .increment(1);
}

// =============================================================================
// Histograms
// =============================================================================

pub fn record_encode_duration(duration_secs: f64) {
    histogram!(names::QR_ENCODE_DURATION_SECONDS).record(duration_secs);
}

// =============================================================================
// Gauges
// =============================================================================

pub fn set_tracked_identities(count: usize) {
    gauge!(names::RATE_LIMIT_TRACKED_IDENTITIES).set(count as f64);
}

pub fn set_cache_entries(count: usize) {
    gauge!(names::CACHE_ENTRIES).set(count as f64);
}
