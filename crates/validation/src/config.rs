//! Service configuration for the FHIR validator.
//!
//! Configuration is read from command line arguments with environment
//! variable fallbacks. The FHIR packages and the terminology server the engine
//! binds to are compiled-in constants (see [`crate::engine`]); only operational
//! knobs are exposed here.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PORT` | 8080 | Server port |
//! | `VALIDATOR_HOST` | 0.0.0.0 | Host to bind |
//! | `VALIDATOR_LOG_LEVEL` | info | Log level |
//! | `VALIDATOR_MAX_BODY_SIZE` | 10485760 | Max request body (bytes) |
//! | `VALIDATOR_REQUEST_TIMEOUT` | 600 | Whole request timeout (seconds), must exceed init + validation timeouts |
//! | `VALIDATOR_VALIDATION_TIMEOUT` | 60 | Engine validation timeout (seconds) |
//! | `VALIDATOR_ENGINE_INIT_TIMEOUT` | 300 | Engine construction timeout (seconds) |
//! | `VALIDATOR_ENGINE_RETRY_BACKOFF` | 5 | Minimum delay between construction attempts (seconds) |
//! | `VALIDATOR_TX_TIMEOUT` | 30 | Terminology server request timeout (seconds) |
//! | `VALIDATOR_PACKAGE_CACHE` | `$TMPDIR/fhir-packages` | FHIR package cache directory |
//! | `VALIDATOR_PRELOAD_ENGINE` | true | Build the engine at startup |
//! | `VALIDATOR_ENABLE_CORS` | true | Enable CORS |
//! | `VALIDATOR_CORS_ORIGINS` | * | Allowed origins |
//!
//! # Example
//!
//! ```rust
//! use helios_validation::ValidatorConfig;
//!
//! let config = ValidatorConfig {
//!     port: 3000,
//!     preload_engine: false,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Configuration for the validation service.
#[derive(Debug, Clone, Parser)]
#[command(name = "fhir-validator")]
#[command(about = "FHIR resource validation service")]
pub struct ValidatorConfig {
    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "VALIDATOR_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "VALIDATOR_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Maximum request body size in bytes.
    #[arg(long, env = "VALIDATOR_MAX_BODY_SIZE", default_value = "10485760")]
    pub max_body_size: usize,

    /// Whole request timeout in seconds. Covers waiting for engine
    /// construction and validation, so it must exceed both timeouts combined.
    #[arg(long, env = "VALIDATOR_REQUEST_TIMEOUT", default_value = "600")]
    pub request_timeout: u64,

    /// Timeout for a single engine validation call, in seconds.
    #[arg(long, env = "VALIDATOR_VALIDATION_TIMEOUT", default_value = "60")]
    pub validation_timeout: u64,

    /// Timeout for constructing the validation engine, in seconds.
    #[arg(long, env = "VALIDATOR_ENGINE_INIT_TIMEOUT", default_value = "300")]
    pub engine_init_timeout: u64,

    /// Minimum delay after a failed construction before another attempt, in seconds.
    #[arg(long, env = "VALIDATOR_ENGINE_RETRY_BACKOFF", default_value = "5")]
    pub engine_retry_backoff: u64,

    /// Terminology server request timeout in seconds.
    #[arg(long, env = "VALIDATOR_TX_TIMEOUT", default_value = "30")]
    pub terminology_timeout: u64,

    /// Directory where downloaded FHIR packages are cached.
    #[arg(long, env = "VALIDATOR_PACKAGE_CACHE")]
    pub package_cache: Option<PathBuf>,

    /// Build the validation engine at startup instead of on the first request.
    #[arg(long, env = "VALIDATOR_PRELOAD_ENGINE", default_value = "true")]
    pub preload_engine: bool,

    /// Enable CORS.
    #[arg(long, env = "VALIDATOR_ENABLE_CORS", default_value = "true")]
    pub enable_cors: bool,

    /// Allowed CORS origins (comma-separated, or * for all).
    #[arg(long, env = "VALIDATOR_CORS_ORIGINS", default_value = "*")]
    pub cors_origins: String,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            log_level: "info".to_string(),
            max_body_size: 10 * 1024 * 1024, // 10MB
            request_timeout: 600,
            validation_timeout: 60,
            engine_init_timeout: 300,
            engine_retry_backoff: 5,
            terminology_timeout: 30,
            package_cache: None,
            preload_engine: true,
            enable_cors: true,
            cors_origins: "*".to_string(),
        }
    }
}

impl ValidatorConfig {
    /// Returns the socket address to bind to.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the package cache directory.
    pub fn package_cache_dir(&self) -> PathBuf {
        self.package_cache
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("fhir-packages"))
    }

    /// Engine validation timeout.
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout)
    }

    /// Engine construction timeout.
    pub fn engine_init_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_init_timeout)
    }

    /// Delay between construction attempts after a failure.
    pub fn engine_retry_backoff(&self) -> Duration {
        Duration::from_secs(self.engine_retry_backoff)
    }

    /// Terminology request timeout.
    pub fn terminology_timeout(&self) -> Duration {
        Duration::from_secs(self.terminology_timeout)
    }

    /// Validates the configuration and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.max_body_size == 0 {
            errors.push("Max body size cannot be 0".to_string());
        }

        if self.request_timeout == 0 {
            errors.push("Request timeout cannot be 0".to_string());
        }

        if self.validation_timeout == 0 {
            errors.push("Validation timeout cannot be 0".to_string());
        }

        if self.engine_init_timeout == 0 {
            errors.push("Engine init timeout cannot be 0".to_string());
        }

        if self.terminology_timeout == 0 {
            errors.push("Terminology timeout cannot be 0".to_string());
        }

        let engine_budget = self
            .engine_init_timeout
            .saturating_add(self.validation_timeout);
        if self.request_timeout <= engine_budget {
            errors.push(format!(
                "Request timeout ({}s) must exceed engine init timeout plus validation timeout ({}s)",
                self.request_timeout, engine_budget
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Creates a configuration suitable for testing.
    ///
    /// Uses ephemeral port 0, short timeouts, no retry back-off and lazy
    /// engine construction.
    pub fn for_testing() -> Self {
        Self {
            port: 0,
            host: "127.0.0.1".to_string(),
            log_level: "debug".to_string(),
            max_body_size: 1024 * 1024,
            request_timeout: 30,
            validation_timeout: 5,
            engine_init_timeout: 5,
            engine_retry_backoff: 0,
            terminology_timeout: 2,
            package_cache: None,
            preload_engine: false,
            enable_cors: false,
            cors_origins: "*".to_string(),
        }
    }
}
