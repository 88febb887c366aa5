//! The built-in conformance validation engine.
//!
//! [`ConformanceEngineFactory`] builds a [`ConformanceEngine`] in three steps:
//!
//! 1. load the FHIR core specification package,
//! 2. connect to the terminology server,
//! 3. load the implementation guide package and, transitively, the packages
//!    it declares as dependencies.
//!
//! The engine validates FHIR JSON structurally against StructureDefinition
//! snapshots (see [`instance`]) and checks `required` and `extensible`
//! bindings (see [`terminology`]). FHIRPath invariants and slicing are not
//! evaluated.

pub mod definitions;
pub mod instance;
pub mod package;
pub mod terminology;

#[cfg(test)]
pub(crate) mod test_support;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::engine::{EngineFactory, EngineSettings, FhirFormat, ValidationEngine};
use crate::error::EngineError;
use crate::outcome::{Issue, IssueType, OperationOutcome, OperationOutcomeBuilder};

pub use definitions::DefinitionStore;
use instance::{BindingStrength, PendingBinding};
use package::{PackageLoader, PackageReference};
pub use terminology::{CodeCheck, TerminologyClient};

/// Validates FHIR JSON against loaded conformance resources.
pub struct ConformanceEngine {
    store: Arc<DefinitionStore>,
    terminology: Option<TerminologyClient>,
}

impl ConformanceEngine {
    /// Creates an engine over `store`. Without a terminology client, value
    /// sets that cannot be expanded locally produce warnings.
    pub fn new(store: DefinitionStore, terminology: Option<TerminologyClient>) -> Self {
        Self {
            store: Arc::new(store),
            terminology,
        }
    }

    async fn check_bindings(&self, bindings: Vec<PendingBinding>) -> Vec<Issue> {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();

        for binding in bindings {
            if !seen.insert((binding.expression.clone(), binding.value_set.clone())) {
                continue;
            }

            let mut invalid = Vec::new();
            let mut unknown = Vec::new();
            let mut valid = false;
            for (system, code) in &binding.codings {
                match terminology::check_code(
                    &self.store,
                    self.terminology.as_ref(),
                    &binding.value_set,
                    system.as_deref(),
                    code,
                )
                .await
                {
                    CodeCheck::Valid => {
                        valid = true;
                        break;
                    }
                    CodeCheck::Invalid(message) => invalid.push(message),
                    CodeCheck::Unknown(reason) => unknown.push(reason),
                }
            }
            if valid {
                continue;
            }

            let issue = if let Some(message) = invalid.into_iter().next() {
                match binding.strength {
                    BindingStrength::Required => Issue::error(IssueType::CodeInvalid, message),
                    BindingStrength::Extensible => Issue::warning(
                        IssueType::CodeInvalid,
                        format!("{} (extensible binding)", message),
                    ),
                }
            } else {
                let reason = unknown.into_iter().next().unwrap_or_default();
                Issue::warning(IssueType::NotSupported, reason)
            };
            issues.push(issue.with_expression(binding.expression));
        }
        issues
    }
}

#[async_trait]
impl ValidationEngine for ConformanceEngine {
    fn name(&self) -> &str {
        "conformance"
    }

    async fn validate(
        &self,
        document: &[u8],
        format: FhirFormat,
        profiles: &[String],
    ) -> Result<OperationOutcome, EngineError> {
        if format != FhirFormat::Json {
            return Err(EngineError::UnsupportedFormat(format.mime_type().to_string()));
        }

        let mut outcome = OperationOutcomeBuilder::new();

        let resource: Value = match serde_json::from_slice(document) {
            Ok(resource) => resource,
            Err(e) => {
                outcome.push(Issue::fatal(
                    IssueType::Structure,
                    format!("Unable to parse JSON: {}", e),
                ));
                return Ok(outcome.build());
            }
        };

        let mut resolved = Vec::with_capacity(profiles.len());
        for profile in profiles {
            match self.store.resolve_profile(profile) {
                Some(definition) => resolved.push(definition),
                None => outcome.push(Issue::error(
                    IssueType::NotFound,
                    format!("Profile reference '{}' could not be resolved", profile),
                )),
            }
        }

        let store = Arc::clone(&self.store);
        let report = tokio::task::spawn_blocking(move || {
            instance::validate_instance(&store, &resource, &resolved)
        })
        .await
        .map_err(|e| EngineError::Validation(e.to_string()))?;

        debug!(
            issues = report.issues.len(),
            bindings = report.bindings.len(),
            "Structural walk finished"
        );

        let mut seen = HashSet::new();
        for issue in report.issues {
            if seen.insert((issue.diagnostics.clone(), issue.expression.clone())) {
                outcome.push(issue);
            }
        }
        outcome.extend(self.check_bindings(report.bindings).await);

        if !outcome.has_issues() {
            outcome.push(Issue::information(IssueType::Informational, "All OK"));
        }
        Ok(outcome.build())
    }
}

/// Builds [`ConformanceEngine`]s from packages fetched through the registry.
#[derive(Debug, Clone, Default)]
pub struct ConformanceEngineFactory;

impl ConformanceEngineFactory {
    /// Creates the factory.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EngineFactory for ConformanceEngineFactory {
    async fn construct(
        &self,
        settings: &EngineSettings,
    ) -> Result<Arc<dyn ValidationEngine>, EngineError> {
        let registry_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::Construction(e.to_string()))?;
        let terminology_client = reqwest::Client::builder()
            .timeout(settings.terminology_timeout)
            .build()
            .map_err(|e| EngineError::Construction(e.to_string()))?;
        let loader = PackageLoader::new(
            registry_client,
            &settings.package_registry,
            &settings.package_cache,
        );

        let core = load_package(&loader, &settings.core_package).await?;
        let terminology =
            TerminologyClient::connect(terminology_client, &settings.terminology_server).await?;
        let guide = load_package(&loader, &settings.implementation_guide).await?;

        let mut loaded = HashSet::from([core.name.clone(), guide.name.clone()]);
        let packages = with_dependencies(&loader, guide, &mut loaded).await?;

        let mut store = DefinitionStore::new();
        store.add_package(core);
        for package in packages {
            store.add_package(package);
        }
        info!(
            packages = ?store.packages(),
            structure_definitions = store.structure_count(),
            "Conformance resources loaded"
        );

        Ok(Arc::new(ConformanceEngine::new(store, Some(terminology))))
    }
}

async fn load_package(
    loader: &PackageLoader,
    reference: &str,
) -> Result<package::Package, EngineError> {
    let parsed: PackageReference = reference
        .parse()
        .map_err(|e: package::PackageError| e.into_engine_error(reference))?;
    load_reference(loader, &parsed).await
}

async fn load_reference(
    loader: &PackageLoader,
    reference: &PackageReference,
) -> Result<package::Package, EngineError> {
    loader
        .load(reference)
        .await
        .map_err(|e| e.into_engine_error(&reference.to_string()))
}

/// Returns `root` followed by every package it depends on, breadth first.
///
/// Packages whose name is already in `loaded` are skipped, so the core
/// specification is never fetched twice and dependency cycles terminate.
async fn with_dependencies(
    loader: &PackageLoader,
    root: package::Package,
    loaded: &mut HashSet<String>,
) -> Result<Vec<package::Package>, EngineError> {
    let mut queue: VecDeque<PackageReference> = root.dependencies.iter().cloned().collect();
    let mut packages = vec![root];

    while let Some(dependency) = queue.pop_front() {
        if !loaded.insert(dependency.name.clone()) {
            continue;
        }
        let package = load_reference(loader, &dependency).await?;
        debug!(
            package = %dependency,
            resources = package.resources.len(),
            "Loaded package dependency"
        );
        queue.extend(package.dependencies.iter().cloned());
        packages.push(package);
    }
    Ok(packages)
}
