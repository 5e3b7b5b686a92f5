//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with defaults that
//! reproduce the stock deployment. A `.env` file in the working directory is
//! read first if present.
//!
//! # Security Configuration
//!
//! - `API_KEYS`: Comma-separated API keys accepted in the `X-API-Key` header
//! - `AUTH_FORM_BYPASS`: Let form-encoded requests skip the key check (default: true)
//! - `TRUSTED_PROXIES`: CIDR ranges whose `X-Forwarded-For` is honored
//!
//! # Request Governance
//!
//! - `RATE_LIMIT_REQUESTS` / `RATE_LIMIT_WINDOW_SECS`: Sliding window budget (default: 5 per 60s)
//! - `CACHE_TTL_SECS`: Lifetime of cached download responses (default: 60)
//! - `SWEEP_INTERVAL_SECS`: How often idle limiter and cache state is evicted (default: 60)

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::middleware::DEFAULT_AUTH_FAILURE_BURST;

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8000)
    pub port: u16,

    /// Maximum request body size in bytes (default: 64 KiB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Storage Configuration
    // =========================================================================
    /// SQLite database file, or `:memory:` (default: "qrcodes.db")
    pub db_name: String,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Accepted API keys
    pub api_keys: Vec<String>,

    /// Whether form-encoded requests bypass the API key check
    pub auth_form_bypass: bool,

    /// Failed auth attempts allowed per identity per minute (default: 0 = guard off)
    pub auth_failure_limit_per_min: u32,

    /// Burst of failed auth attempts absorbed before the per-minute rate applies
    pub auth_failure_burst: u32,

    /// Comma-separated list of allowed CORS origins; "*" allows any
    pub cors_allowed_origins: Vec<String>,

    /// Trusted proxy CIDR ranges.
    ///
    /// Forwarded-for headers are honored only when the connection originates
    /// from one of these networks. Empty means no proxy is trusted.
    ///
    /// Common values:
    /// - Kubernetes: "10.0.0.0/8"
    /// - Docker: "172.17.0.0/16"
    /// - Localhost: "127.0.0.0/8,::1/128"
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Requests admitted per identity per window (default: 5)
    pub rate_limit_requests: u32,

    /// Sliding window length (default: 60s)
    pub rate_limit_window: Duration,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Lifetime of a cached result (default: 60s)
    pub cache_ttl: Duration,

    /// Largest response body the cache will buffer (default: 1 MiB)
    pub cache_max_body_bytes: usize,

    /// Interval of the background eviction sweep (default: 60s)
    pub sweep_interval: Duration,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Port for Prometheus metrics endpoint (default: 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if a value does not parse or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or(defaults.host),
            port: Self::parse_env("PORT", defaults.port)?,
            max_request_body_size: Self::parse_env(
                "MAX_REQUEST_BODY_SIZE",
                defaults.max_request_body_size,
            )?,

            // Storage
            db_name: env::var("DB_NAME")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.db_name),

            // Security
            api_keys: env::var("API_KEYS")
                .map(|raw| Self::parse_list(&raw))
                .unwrap_or(defaults.api_keys),
            auth_form_bypass: Self::parse_env("AUTH_FORM_BYPASS", defaults.auth_form_bypass)?,
            auth_failure_limit_per_min: Self::parse_env(
                "AUTH_FAILURE_LIMIT_PER_MIN",
                defaults.auth_failure_limit_per_min,
            )?,
            auth_failure_burst: Self::parse_env("AUTH_FAILURE_BURST", defaults.auth_failure_burst)?,
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .map(|raw| Self::parse_list(&raw))
                .unwrap_or(defaults.cors_allowed_origins),
            trusted_proxies: env::var("TRUSTED_PROXIES")
                .map(|raw| Self::parse_list(&raw))
                .unwrap_or_default(),

            // Rate limiting
            rate_limit_requests: Self::parse_env(
                "RATE_LIMIT_REQUESTS",
                defaults.rate_limit_requests,
            )?,
            rate_limit_window: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_WINDOW_SECS",
                defaults.rate_limit_window.as_secs(),
            )?),

            // Cache
            cache_ttl: Duration::from_secs(Self::parse_env(
                "CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )?),
            cache_max_body_bytes: Self::parse_env(
                "CACHE_MAX_BODY_BYTES",
                defaults.cache_max_body_bytes,
            )?,
            sweep_interval: Duration::from_secs(Self::parse_env(
                "SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )?),

            // Observability
            metrics_port: Self::parse_env("METRICS_PORT", defaults.metrics_port)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.api_keys.is_empty() {
            return Err(AppError::ConfigError(
                "API_KEYS must contain at least one key".to_string(),
            ));
        }

        if self.rate_limit_requests == 0 {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_REQUESTS must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }

        if self.cache_ttl.is_zero() {
            return Err(AppError::ConfigError(
                "CACHE_TTL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.sweep_interval.is_zero() {
            return Err(AppError::ConfigError(
                "SWEEP_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if the auth failure guard is enabled.
    pub fn auth_failure_guard_enabled(&self) -> bool {
        self.auth_failure_limit_per_min > 0
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_enabled()
            .then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Split a comma-separated list, dropping blanks.
    fn parse_list(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_request_body_size: 64 * 1024,
            // Storage
            db_name: "qrcodes.db".to_string(),
            // Security
            api_keys: vec!["secret_key_1".to_string(), "secret_key_2".to_string()],
            auth_form_bypass: true,
            auth_failure_limit_per_min: 0,
            auth_failure_burst: DEFAULT_AUTH_FAILURE_BURST,
            cors_allowed_origins: vec!["*".to_string()],
            trusted_proxies: vec![],
            // Rate limiting
            rate_limit_requests: 5,
            rate_limit_window: Duration::from_secs(60),
            // Cache
            cache_ttl: Duration::from_secs(60),
            cache_max_body_bytes: 1024 * 1024,
            sweep_interval: Duration::from_secs(60),
            // Observability
            metrics_port: 0,
        }
    }
}
