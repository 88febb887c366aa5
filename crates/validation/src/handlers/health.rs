//! Health check endpoint handlers.
//!
//! None of these endpoints trigger engine construction; they only report the
//! provider's current state.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::debug;

use crate::engine::EngineState;
use crate::state::AppState;

/// Handler for the health check endpoint.
///
/// # HTTP Request
///
/// `GET [base]/health`
///
/// # Response
///
/// `200 OK` with the service status and the engine lifecycle state.
pub async fn health_handler(State(state): State<AppState>) -> Response {
    debug!("Processing health check request");

    let engine_state = state.provider().state();
    let mut engine = json!({
        "state": engine_state.as_str(),
        "attempts": state.provider().attempts(),
    });
    if let EngineState::Failed { message } = &engine_state {
        engine["error"] = json!(message);
    }

    let health_response = json!({
        "status": "healthy",
        "engine": engine,
        "timestamp": chrono::Utc::now().to_rfc3339()
    });

    (StatusCode::OK, Json(health_response)).into_response()
}

/// Handler for the liveness probe.
///
/// # HTTP Request
///
/// `GET [base]/_liveness`
pub async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Handler for the readiness probe.
///
/// With engine preloading on, the service is ready once the engine has been
/// built; the background warm-up keeps retrying until then. With preloading
/// off, the first request builds the engine, so the service accepts traffic
/// except while a construction attempt is running.
///
/// # HTTP Request
///
/// `GET [base]/_readiness`
///
/// # Response
///
/// - `200 OK` - Requests can be served
/// - `503 Service Unavailable` - The engine is being built, or preloading has
///   not produced an engine yet
pub async fn readiness_handler(State(state): State<AppState>) -> Response {
    debug!("Processing readiness check request");

    let engine_state = state.provider().state();
    let ready = match &engine_state {
        EngineState::Ready => true,
        EngineState::Initializing => false,
        EngineState::Uninitialized | EngineState::Failed { .. } => {
            !state.config().preload_engine
        }
    };
    let (status, label) = if ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not-ready")
    };

    let response = json!({
        "status": label,
        "checks": {
            "engine": engine_state.as_str()
        }
    });

    (status, Json(response)).into_response()
}
