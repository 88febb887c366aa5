//! Route configuration for the validation service.

pub mod validator_routes;

pub use validator_routes::create_routes;
