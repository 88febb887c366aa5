//! Validator route configuration.

use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers;
use crate::state::AppState;

/// Creates all routes.
///
/// # Routes
///
/// - `POST /validate` - Validate a FHIR resource
/// - `GET /health` - Health check with engine state
/// - `GET /_liveness` - Liveness probe
/// - `GET /_readiness` - Readiness probe
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/validate", post(handlers::validate_handler))
        .route("/health", get(handlers::health_handler))
        .route("/_liveness", get(handlers::liveness_handler))
        .route("/_readiness", get(handlers::readiness_handler))
        .with_state(state)
}
