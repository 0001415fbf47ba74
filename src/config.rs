//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Initialization Gate
//!
//! - `APIINIT_DISABLED`: When `true`, the gate never intercepts traffic (the
//!   `apiinit.disabled` option of the gateway, default: `false`)
//! - `APIINIT_BYPASS_PATHS`: Comma-separated paths that are never gated
//!   (default: `/health,/ready`)
//! - `APIINIT_DEFAULT_LANG`: Language for gate errors when the caller sends no
//!   `api_lang` parameter (default: `en_us`)
//!
//! # Collaborators
//!
//! - `APISIGN_KEY` / `APISIGN_DISABLED`: Initial signing validator settings
//! - `APIPROXY_BACKENDS`: Comma-separated backend aliases known to the proxy

use std::env;

use crate::error::{AppError, AppResult, Lang};

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

    /// Server port (default: 3000)
    pub port: u16,

    /// Maximum request body size in bytes (default: 1MB)
    /// Bodies are buffered by the gate while it is waiting for initialization
    pub max_request_body_size: usize,

    // =========================================================================
    // Initialization Gate Configuration
    // =========================================================================
    /// Disable the gate entirely (`apiinit.disabled`, default: false)
    pub init_disabled: bool,

    /// Paths that are never gated (default: ["/health", "/ready"])
    pub init_bypass_paths: Vec<String>,

    /// Language used for gate errors when the caller does not pick one
    pub default_lang: Lang,

    // =========================================================================
    // Collaborator Configuration
    // =========================================================================
    /// Initial signing key for the signing validator (empty = unset)
    pub sign_key: String,

    /// Start with the signing validator disabled (default: false)
    pub sign_disabled: bool,

    /// Backend aliases registered with the proxy (default: none)
    pub proxy_backends: Vec<String>,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Comma-separated list of allowed CORS origins
    /// Use "*" to allow all origins (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable text
    pub log_json: bool,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any configuration value is invalid
    /// (e.g., non-numeric PORT value, unknown default language).
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?, // 1MB

            // Initialization gate
            init_disabled: Self::parse_env("APIINIT_DISABLED", false)?,
            init_bypass_paths: Self::parse_bypass_paths(),
            default_lang: Self::parse_env("APIINIT_DEFAULT_LANG", Lang::EnUs)?,

            // Collaborators
            sign_key: env::var("APISIGN_KEY").unwrap_or_default(),
            sign_disabled: Self::parse_env("APISIGN_DISABLED", false)?,
            proxy_backends: Self::parse_list("APIPROXY_BACKENDS", ""),

            // Security
            cors_allowed_origins: Self::parse_list("CORS_ALLOWED_ORIGINS", "*"),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    fn validate(&self) -> AppResult<()> {
        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if let Some(alias) = self.proxy_backends.iter().find(|a| a.contains('.')) {
            // An alias with a dot could never be addressed by `apiproxy.<alias>.<setting>`
            return Err(AppError::ConfigError(format!(
                "APIPROXY_BACKENDS alias `{alias}` must not contain '.'"
            )));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
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

    /// Parse a comma-separated list, dropping empty entries.
    fn parse_list(name: &str, default: &str) -> Vec<String> {
        env::var(name)
            .unwrap_or_else(|_| default.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Parse gate bypass paths from environment variable.
    ///
    /// Default: "/health,/ready" (standard Kubernetes health endpoints)
    fn parse_bypass_paths() -> Vec<String> {
        Self::parse_list("APIINIT_BYPASS_PATHS", "/health,/ready")
            .into_iter()
            .filter(|s| s.starts_with('/'))
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
            port: 3000,
            max_request_body_size: 1024 * 1024, // 1MB
            // Initialization gate
            init_disabled: false,
            init_bypass_paths: vec!["/health".to_string(), "/ready".to_string()],
            default_lang: Lang::EnUs,
            // Collaborators
            sign_key: String::new(),
            sign_disabled: false,
            proxy_backends: vec![],
            // Security
            cors_allowed_origins: vec!["*".to_string()],
            // Observability
            log_level: "info".to_string(),
            log_json: false,
            metrics_port: 9090,
        }
    }
}
