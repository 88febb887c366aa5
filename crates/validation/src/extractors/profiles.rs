//! Profile list extractor.
//!
//! Collects the repeated `profile` query parameter. axum's `Query` extractor
//! deserializes into a map and would keep only one value per key, so the raw
//! query string is parsed here to keep every value in caller order.

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};
use url::form_urlencoded;

/// Query parameter naming a profile.
pub const PROFILE_PARAM: &str = "profile";

/// Ordered list of profile identifiers supplied with a validation request.
///
/// An absent parameter yields an empty list, never `None`. Values are passed
/// through exactly as sent, blank ones included; the engine decides what they
/// mean.
///
/// # Example
///
/// ```rust,ignore
/// use helios_validation::extractors::ProfileList;
///
/// // POST /validate?profile=us-core-patient&profile=us-core-observation
/// async fn handler(profiles: ProfileList) {
///     assert_eq!(profiles.as_slice(), ["us-core-patient", "us-core-observation"]);
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileList(Vec<String>);

impl ProfileList {
    /// Parses profile identifiers from a raw query string.
    pub fn from_query(query: &str) -> Self {
        Self(
            form_urlencoded::parse(query.as_bytes())
                .filter(|(key, _)| key == PROFILE_PARAM)
                .map(|(_, value)| value.into_owned())
                .collect(),
        )
    }

    /// Returns the identifiers in caller order.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Returns true when no profile was supplied.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of profiles.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<S> FromRequestParts<S> for ProfileList
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .uri
            .query()
            .map(ProfileList::from_query)
            .unwrap_or_default())
    }
}
