//! Error types for the validation service.
//!
//! Two layers of errors exist:
//!
//! - [`EngineError`] is produced by the validation engine and its provider.
//! - [`ValidationError`] is the request-boundary error. Every variant renders
//!   as a FHIR OperationOutcome with a single `fatal` issue and a non-2xx
//!   status, so a failed request can always be told apart from a completed
//!   validation that found issues.
//!
//! # Error Mapping
//!
//! | Error | HTTP Status | FHIR Issue Code | Error indicator |
//! |-------|-------------|-----------------|-----------------|
//! | InputParse | 400 | invalid | input-parse-error |
//! | PayloadTooLarge | 413 | processing | payload-too-large |
//! | EngineUnavailable | 503 | transient | engine-unavailable |
//! | ExecutionFailed | 500 | exception | validation-failed |
//! | ExecutionTimeout | 504 | timeout | validation-timeout |
//! | RequestTimeout | 408 | timeout | request-timeout |

// Engine error variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::outcome::{CodeableConcept, Coding, Issue, IssueType, OperationOutcome};

/// Code system carrying the error indicator of failed requests.
pub const ERROR_SYSTEM: &str = "urn:helios:validator:error";

/// Errors raised while constructing or running a validation engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A FHIR package could not be fetched or read.
    #[error("failed to load package {package}: {message}")]
    PackageLoad { package: String, message: String },

    /// The terminology server could not be reached.
    #[error("terminology server {url} unavailable: {message}")]
    TerminologyUnavailable { url: String, message: String },

    /// Construction did not finish within the configured time.
    #[error("engine construction timed out after {seconds}s")]
    InitTimeout { seconds: u64 },

    /// Any other construction failure.
    #[error("engine construction failed: {0}")]
    Construction(String),

    /// The engine cannot read the declared format.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The engine failed while validating.
    #[error("validation failed: {0}")]
    Validation(String),
}

/// The request-boundary error type.
#[derive(Debug)]
pub enum ValidationError {
    /// The request body is not a parseable FHIR JSON document (HTTP 400).
    InputParse {
        /// Parser message.
        message: String,
    },

    /// The request body exceeds the configured limit (HTTP 413).
    PayloadTooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },

    /// The engine could not be constructed (HTTP 503).
    EngineUnavailable {
        /// The construction failure.
        source: EngineError,
    },

    /// The engine failed during validation (HTTP 500).
    ExecutionFailed {
        /// The engine failure.
        source: EngineError,
    },

    /// The engine did not finish in time (HTTP 504).
    ExecutionTimeout {
        /// Configured timeout in seconds.
        seconds: u64,
    },

    /// The whole request, including any wait for the engine, did not finish
    /// in time (HTTP 408).
    RequestTimeout {
        /// Configured timeout in seconds.
        seconds: u64,
    },
}

impl ValidationError {
    /// Returns the error indicator code placed in the response body.
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::InputParse { .. } => "input-parse-error",
            ValidationError::PayloadTooLarge { .. } => "payload-too-large",
            ValidationError::EngineUnavailable { .. } => "engine-unavailable",
            ValidationError::ExecutionFailed { .. } => "validation-failed",
            ValidationError::ExecutionTimeout { .. } => "validation-timeout",
            ValidationError::RequestTimeout { .. } => "request-timeout",
        }
    }

    /// Returns the HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ValidationError::InputParse { .. } => StatusCode::BAD_REQUEST,
            ValidationError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ValidationError::EngineUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ValidationError::ExecutionFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ValidationError::ExecutionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ValidationError::RequestTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
        }
    }

    fn issue_type(&self) -> IssueType {
        match self {
            ValidationError::InputParse { .. } => IssueType::Invalid,
            ValidationError::PayloadTooLarge { .. } => IssueType::Processing,
            ValidationError::EngineUnavailable { .. } => IssueType::Transient,
            ValidationError::ExecutionFailed { .. } => IssueType::Exception,
            ValidationError::ExecutionTimeout { .. } | ValidationError::RequestTimeout { .. } => {
                IssueType::Timeout
            }
        }
    }

    /// Renders the error as an OperationOutcome.
    pub fn to_outcome(&self) -> OperationOutcome {
        let details = CodeableConcept {
            coding: vec![Coding {
                system: Some(ERROR_SYSTEM.to_string()),
                code: Some(self.kind().to_string()),
                display: None,
            }],
            text: Some("Validation could not be completed".to_string()),
        };
        let issue = Issue::fatal(self.issue_type(), self.to_string()).with_details(details);
        OperationOutcome::new(vec![issue])
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InputParse { message } => {
                write!(f, "Unable to parse request body as FHIR JSON: {}", message)
            }
            ValidationError::PayloadTooLarge { limit } => {
                write!(f, "Request body exceeds the limit of {} bytes", limit)
            }
            ValidationError::EngineUnavailable { source } => {
                write!(f, "Validation engine unavailable: {}", source)
            }
            ValidationError::ExecutionFailed { source } => {
                write!(f, "Validation did not complete: {}", source)
            }
            ValidationError::ExecutionTimeout { seconds } => {
                write!(f, "Validation did not complete within {}s", seconds)
            }
            ValidationError::RequestTimeout { seconds } => {
                write!(f, "Request did not complete within {}s", seconds)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl IntoResponse for ValidationError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_outcome())).into_response()
    }
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        ValidationError::InputParse {
            message: err.to_string(),
        }
    }
}

/// Result type alias for request handling.
pub type ValidationResult<T> = Result<T, ValidationError>;
