//! OperationOutcome response building.

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::error::{EngineError, ValidationError, ValidationResult};
use crate::outcome::OperationOutcome;

/// Content type of validation responses.
pub const OUTCOME_CONTENT_TYPE: &str = "application/json";

/// Builds the `200 OK` response for a completed validation.
///
/// The outcome is written as compact JSON with its issues in engine order.
/// Findings of any severity still produce `200`; only a failure to run the
/// validation is reported with an error status.
pub fn outcome_response(outcome: &OperationOutcome) -> ValidationResult<Response> {
    let body = serde_json::to_vec(outcome).map_err(|e| ValidationError::ExecutionFailed {
        source: EngineError::Validation(format!("failed to serialize outcome: {}", e)),
    })?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static(OUTCOME_CONTENT_TYPE),
        )],
        body,
    )
        .into_response())
}
