//! Common test utilities for validation service testing.
//!
//! - [`harness`] - Test server harness with mock engines
//! - [`assertions`] - HTTP response assertions
//! - [`fixtures`] - FHIR documents and packages used by the tests

#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;
pub mod harness;
