//! Axum extractors for validation requests.
//!
//! - [`ProfileList`] - Extract the ordered `profile` query parameters

mod profiles;

pub use profiles::ProfileList;
