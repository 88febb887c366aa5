//! Response formatting for the validation service.
//!
//! - [`outcome`] - Serializes a completed validation's OperationOutcome

pub mod outcome;

pub use outcome::outcome_response;
