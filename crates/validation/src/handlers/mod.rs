//! HTTP request handlers.
//!
//! - [`validate`] - Validate a FHIR resource
//! - [`health`] - Health, liveness and readiness endpoints

pub mod health;
pub mod validate;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use validate::validate_handler;
