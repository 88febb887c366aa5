//! Validation endpoint handler.
//!
//! `POST [base]/validate?profile=...` runs the submitted FHIR JSON document
//! through the shared validation engine and returns the engine's
//! OperationOutcome.

use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::REQUEST_ID_HEADER;
use crate::engine::FhirFormat;
use crate::error::{ValidationError, ValidationResult};
use crate::extractors::ProfileList;
use crate::responses::outcome_response;
use crate::state::AppState;

/// Handler for the validate endpoint.
///
/// # HTTP Request
///
/// `POST [base]/validate?profile=[id]&profile=[id]`
///
/// The body is a single FHIR resource in JSON. `profile` may be repeated; the
/// engine receives the profiles in the order given.
///
/// # Response
///
/// - `200 OK` - Validation ran; the body lists every issue found (possibly none)
/// - `400 Bad Request` - The body is not a JSON object
/// - `413 Payload Too Large` - The body exceeds the configured limit
/// - `500 Internal Server Error` - The engine failed while validating
/// - `503 Service Unavailable` - The engine could not be constructed
/// - `504 Gateway Timeout` - Validation exceeded the configured timeout
///
/// Every error response is an OperationOutcome with a single `fatal` issue.
///
/// # Example
///
/// ```http
/// POST /validate?profile=us-core-patient HTTP/1.1
/// Content-Type: application/fhir+json
///
/// {"resourceType": "Patient", "name": [{"family": "Smith"}]}
/// ```
pub async fn validate_handler(
    State(state): State<AppState>,
    profiles: ProfileList,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let request_id = request_id(&headers);
    debug!(
        request_id = %request_id,
        profiles = ?profiles.as_slice(),
        "Processing validate request"
    );

    match validate(&state, &profiles, body, &request_id).await {
        Ok(response) => response,
        Err(err) => {
            if err.status().is_server_error() {
                error!(request_id = %request_id, kind = err.kind(), error = %err, "Validation request failed");
            } else {
                warn!(request_id = %request_id, kind = err.kind(), error = %err, "Validation request rejected");
            }
            err.into_response()
        }
    }
}

async fn validate(
    state: &AppState,
    profiles: &ProfileList,
    body: Result<Bytes, BytesRejection>,
    request_id: &str,
) -> ValidationResult<Response> {
    let document = read_document(body, state.max_body_size())?;

    let engine = state
        .provider()
        .get()
        .await
        .map_err(|source| ValidationError::EngineUnavailable { source })?;

    let timeout = state.config().validation_timeout();
    let started = Instant::now();
    let outcome = tokio::time::timeout(
        timeout,
        engine.validate(&document, FhirFormat::Json, profiles.as_slice()),
    )
    .await
    .map_err(|_| ValidationError::ExecutionTimeout {
        seconds: timeout.as_secs(),
    })?
    .map_err(|source| ValidationError::ExecutionFailed { source })?;

    let tally = outcome.tally();
    info!(
        request_id = %request_id,
        engine = engine.name(),
        profiles = profiles.len(),
        errors = tally.errors,
        warnings = tally.warnings,
        information = tally.information,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "{}",
        if tally.is_success() { "Success" } else { "FAILURE" }
    );

    outcome_response(&outcome)
}

/// The `x-request-id` set by the request-id layer, or a fresh one.
fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Checks that the body holds a JSON object and returns its bytes unchanged.
fn read_document(body: Result<Bytes, BytesRejection>, limit: usize) -> ValidationResult<Bytes> {
    let bytes = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ValidationError::PayloadTooLarge { limit }
        } else {
            ValidationError::InputParse {
                message: rejection.body_text(),
            }
        }
    })?;

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ValidationError::InputParse {
            message: "request body is empty".to_string(),
        });
    }

    match serde_json::from_slice::<Value>(&bytes)? {
        Value::Object(_) => Ok(bytes),
        other => Err(ValidationError::InputParse {
            message: format!("expected a JSON object, found {}", json_kind(&other)),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
