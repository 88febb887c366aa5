//! The validation engine contract and its shared lifecycle.
//!
//! A validation engine is expensive to build: it loads the FHIR core
//! specification, connects to a terminology server and loads an
//! implementation guide. Request handlers never build one themselves; they ask
//! the [`EngineProvider`] for the single shared instance.
//!
//! - [`ValidationEngine`] - validates one document against a profile list
//! - [`EngineFactory`] - builds an engine from [`EngineSettings`]
//! - [`EngineProvider`] - creates the engine once and shares it

pub mod provider;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ValidatorConfig;
use crate::error::EngineError;
use crate::outcome::OperationOutcome;

pub use provider::{EngineProvider, EngineState};

/// The FHIR core specification package the engine is bound to.
pub const CORE_PACKAGE: &str = "hl7.fhir.r4.core#4.0.1";

/// The base implementation guide loaded on top of the core specification.
pub const BASE_IMPLEMENTATION_GUIDE: &str = "hl7.fhir.us.core";

/// The terminology server the engine connects to.
pub const TERMINOLOGY_SERVER: &str = "http://tx.fhir.org";

/// The FHIR package registry packages are fetched from.
pub const PACKAGE_REGISTRY: &str = "https://packages.fhir.org";

/// Serialization format of a submitted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FhirFormat {
    /// FHIR JSON.
    Json,
    /// FHIR XML.
    Xml,
}

impl FhirFormat {
    /// Returns the FHIR MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            FhirFormat::Json => "application/fhir+json",
            FhirFormat::Xml => "application/fhir+xml",
        }
    }
}

impl fmt::Display for FhirFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FhirFormat::Json => f.write_str("json"),
            FhirFormat::Xml => f.write_str("xml"),
        }
    }
}

/// Everything an [`EngineFactory`] needs to build an engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Core specification package, `name#version`.
    pub core_package: String,
    /// Implementation guide package, `name` or `name#version`.
    pub implementation_guide: String,
    /// Terminology server base URL.
    pub terminology_server: String,
    /// Package registry base URL.
    pub package_registry: String,
    /// Local package cache directory.
    pub package_cache: PathBuf,
    /// Timeout for individual terminology requests.
    pub terminology_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&ValidatorConfig::default())
    }
}

impl EngineSettings {
    /// Builds settings from the compiled-in constants and the service configuration.
    pub fn from_config(config: &ValidatorConfig) -> Self {
        Self {
            core_package: CORE_PACKAGE.to_string(),
            implementation_guide: BASE_IMPLEMENTATION_GUIDE.to_string(),
            terminology_server: TERMINOLOGY_SERVER.to_string(),
            package_registry: PACKAGE_REGISTRY.to_string(),
            package_cache: config.package_cache_dir(),
            terminology_timeout: config.terminology_timeout(),
        }
    }
}

/// A ready-to-use validation engine.
///
/// Implementations are immutable after construction and shared between
/// concurrent requests, so `validate` takes `&self`.
#[async_trait]
pub trait ValidationEngine: Send + Sync {
    /// Short name used in logs and health output.
    fn name(&self) -> &str;

    /// Validates `document` against the base definitions and every profile in
    /// `profiles`, in the order given.
    ///
    /// Conformance problems are reported as issues in the returned outcome;
    /// an `Err` means validation itself could not be carried out.
    async fn validate(
        &self,
        document: &[u8],
        format: FhirFormat,
        profiles: &[String],
    ) -> Result<OperationOutcome, EngineError>;
}

/// Builds validation engines.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Constructs a new engine. May perform network I/O.
    async fn construct(
        &self,
        settings: &EngineSettings,
    ) -> Result<Arc<dyn ValidationEngine>, EngineError>;
}
