//! # helios-validation - FHIR Resource Validation Service
//!
//! This crate provides an HTTP service that validates a FHIR resource,
//! submitted as JSON, against the base FHIR R4 definitions and any number of
//! profiles, and answers with a FHIR
//! [OperationOutcome](https://hl7.org/fhir/R4/operationoutcome.html) listing
//! every issue found.
//!
//! ## Features
//!
//! - **Shared engine**: the validation engine is expensive to build, so it is
//!   constructed once on first use and shared by all requests
//! - **Retryable initialization**: a failed construction is reported to the
//!   requests that waited on it and retried by later requests
//! - **Bounded work**: construction and validation both run under timeouts
//! - **Conformance engine**: structural, cardinality, profile and binding
//!   checks against packages fetched from the FHIR package registry
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use helios_validation::{ValidatorConfig, create_app_with_config};
//! use helios_validation::conformance::ConformanceEngineFactory;
//! use helios_validation::engine::EngineProvider;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ValidatorConfig::default();
//!     let provider =
//!         EngineProvider::from_config(Arc::new(ConformanceEngineFactory::new()), &config);
//!
//!     let app = create_app_with_config(provider, config);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## API Endpoints
//!
//! | Endpoint | HTTP Method | Description |
//! |----------|-------------|-------------|
//! | `/validate?profile=..` | POST | Validate the JSON body; `profile` is repeatable |
//! | `/health` | GET | Service status and engine state |
//! | `/_liveness` | GET | Liveness probe |
//! | `/_readiness` | GET | 503 while the engine is unusable, see [`handlers::readiness_handler`] |
//!
//! ## Error Handling
//!
//! A completed validation always answers `200`, even when the outcome holds
//! errors. A request that could not be validated answers with an
//! OperationOutcome holding one `fatal` issue:
//!
//! | HTTP Status | FHIR Issue Code | Description |
//! |-------------|-----------------|-------------|
//! | 400 | invalid | Body is not a JSON object |
//! | 413 | processing | Body exceeds the size limit |
//! | 500 | exception | Engine failed during validation |
//! | 503 | transient | Engine could not be constructed |
//! | 504 | timeout | Validation timed out |
//! | 408 | timeout | Whole request timed out |
//!
//! ## Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PORT` | 8080 | Server port |
//! | `VALIDATOR_HOST` | 0.0.0.0 | Host to bind |
//! | `VALIDATOR_LOG_LEVEL` | info | Log level (error, warn, info, debug, trace) |
//! | `VALIDATOR_MAX_BODY_SIZE` | 10485760 | Max request body size (bytes) |
//! | `VALIDATOR_REQUEST_TIMEOUT` | 600 | Whole request timeout (seconds), above init + validation |
//! | `VALIDATOR_VALIDATION_TIMEOUT` | 60 | Validation timeout (seconds) |
//! | `VALIDATOR_ENGINE_INIT_TIMEOUT` | 300 | Engine construction timeout (seconds) |
//! | `VALIDATOR_ENGINE_RETRY_BACKOFF` | 5 | Minimum seconds between construction attempts |
//! | `VALIDATOR_TX_TIMEOUT` | 30 | Terminology request timeout (seconds) |
//! | `VALIDATOR_PACKAGE_CACHE` | `$TMPDIR/fhir-packages` | Package cache directory |
//! | `VALIDATOR_PRELOAD_ENGINE` | true | Build the engine at startup |
//! | `VALIDATOR_ENABLE_CORS` | true | Enable CORS |
//! | `VALIDATOR_CORS_ORIGINS` | * | Allowed CORS origins |
//!
//! ## Architecture
//!
//! - [`config`] - Service configuration
//! - [`error`] - Error types and their OperationOutcome rendering
//! - [`outcome`] - OperationOutcome model and severity tally
//! - [`engine`] - Engine contract and the shared [`EngineProvider`]
//! - [`conformance`] - The built-in conformance engine
//! - [`state`] - Application state
//! - [`handlers`] - HTTP request handlers
//! - [`extractors`] - Axum extractors
//! - [`responses`] - Response formatting
//! - [`routing`] - Route configuration

// Enforce documentation
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod conformance;
pub mod engine;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod outcome;
pub mod responses;
pub mod routing;
pub mod state;

// Re-export commonly used types
pub use config::ValidatorConfig;
pub use engine::{EngineProvider, EngineState};
pub use error::{EngineError, ValidationError, ValidationResult};
pub use outcome::{OperationOutcome, SeverityTally};
pub use state::AppState;

use std::time::Duration;

use axum::{
    BoxError, Router, error_handling::HandleErrorLayer, extract::DefaultBodyLimit,
    http::HeaderName,
};
use tower::{ServiceBuilder, timeout::TimeoutLayer};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Header carrying the per-request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Creates the Axum application.
///
/// # Arguments
///
/// * `provider` - The shared engine provider
/// * `config` - Service configuration
///
/// # Example
///
/// ```rust,ignore
/// use helios_validation::{ValidatorConfig, create_app_with_config};
///
/// let config = ValidatorConfig {
///     port: 3000,
///     enable_cors: false,
///     ..Default::default()
/// };
/// let app = create_app_with_config(provider, config);
/// ```
pub fn create_app_with_config(provider: EngineProvider, config: ValidatorConfig) -> Router {
    info!(
        max_body_size = config.max_body_size,
        validation_timeout = config.validation_timeout,
        "Creating validation service"
    );

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    let state = AppState::new(provider, config.clone());

    let router =
        routing::create_routes(state).layer(DefaultBodyLimit::max(config.max_body_size));

    let request_timeout = config.request_timeout;
    let service_builder = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id))
        .layer(HandleErrorLayer::new(move |err: BoxError| async move {
            middleware_error(err, request_timeout)
        }))
        .layer(TimeoutLayer::new(Duration::from_secs(request_timeout)));

    let router = if config.enable_cors {
        router.layer(build_cors_layer(&config))
    } else {
        router
    };

    router.layer(service_builder)
}

/// Turns a middleware failure into an OperationOutcome response.
fn middleware_error(err: BoxError, request_timeout: u64) -> ValidationError {
    if err.is::<tower::timeout::error::Elapsed>() {
        warn!(seconds = request_timeout, "Request timed out");
        ValidationError::RequestTimeout {
            seconds: request_timeout,
        }
    } else {
        ValidationError::ExecutionFailed {
            source: EngineError::Validation(err.to_string()),
        }
    }
}

/// Builds the CORS layer based on configuration.
fn build_cors_layer(config: &ValidatorConfig) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.cors_origins == "*" {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

/// Initializes the tracing subscriber for logging.
///
/// This should be called once at application startup. `RUST_LOG` overrides
/// `level` when set.
///
/// # Arguments
///
/// * `level` - The log level (error, warn, info, debug, trace)
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "helios_validation={level},fhir_validator={level},tower_http=debug"
        ))
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
