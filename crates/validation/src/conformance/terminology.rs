//! Code membership checks for terminology bindings.
//!
//! A code is first checked against the ValueSets and CodeSystems loaded from
//! packages. Only when a value set cannot be decided locally (intensional
//! filters, imported value sets, fragment code systems) is the terminology
//! server asked via `ValueSet/$validate-code`. Server answers are cached for
//! the lifetime of the engine.

use std::collections::HashMap;

use parking_lot::RwLock;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::definitions::DefinitionStore;
use crate::error::EngineError;

/// Result of a single code check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeCheck {
    /// The code is a member of the value set.
    Valid,
    /// The code is not a member; carries the explanation.
    Invalid(String),
    /// Membership could not be determined; carries the reason.
    Unknown(String),
}

type CacheKey = (String, Option<String>, String);

/// Client for a FHIR terminology server.
#[derive(Debug)]
pub struct TerminologyClient {
    client: reqwest::Client,
    base: String,
    cache: RwLock<HashMap<CacheKey, CodeCheck>>,
}

impl TerminologyClient {
    /// Connects to the server at `base` and verifies it answers as a FHIR R4
    /// terminology service.
    pub async fn connect(client: reqwest::Client, base: &str) -> Result<Self, EngineError> {
        let base = base.trim_end_matches('/').to_string();
        let url = format!("{}/r4/metadata", base);
        let server = base.clone();
        let unavailable = move |message: String| EngineError::TerminologyUnavailable {
            url: server.clone(),
            message,
        };

        let response = client
            .get(&url)
            .header(ACCEPT, "application/fhir+json")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| unavailable(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        match body.get("resourceType").and_then(Value::as_str) {
            Some("TerminologyCapabilities") | Some("CapabilityStatement") => {
                info!(server = %base, "Connected to terminology server");
                Ok(Self {
                    client,
                    base,
                    cache: RwLock::new(HashMap::new()),
                })
            }
            other => Err(unavailable(format!(
                "metadata returned {} instead of a capability statement",
                other.unwrap_or("no resource")
            ))),
        }
    }

    /// Asks the server whether `code` is in `value_set`.
    pub async fn validate_code(
        &self,
        value_set: &str,
        system: Option<&str>,
        code: &str,
    ) -> CodeCheck {
        let key = (
            value_set.to_string(),
            system.map(str::to_string),
            code.to_string(),
        );
        if let Some(cached) = self.cache.read().get(&key) {
            return cached.clone();
        }

        let url = format!("{}/r4/ValueSet/$validate-code", self.base);
        let mut query = vec![("url", value_set), ("code", code)];
        if let Some(system) = system {
            query.push(("system", system));
        }

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/fhir+json")
            .query(&query)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        let body: Value = match response {
            Ok(response) => match response.json().await {
                Ok(body) => body,
                Err(e) => return CodeCheck::Unknown(format!("unreadable server response: {}", e)),
            },
            Err(e) => {
                warn!(value_set = %value_set, error = %e, "Terminology request failed");
                return CodeCheck::Unknown(format!("terminology server error: {}", e));
            }
        };

        let check = read_parameters(&body, value_set, code);
        debug!(value_set = %value_set, code = %code, result = ?check, "Terminology check");
        self.cache.write().insert(key, check.clone());
        check
    }
}

fn read_parameters(body: &Value, value_set: &str, code: &str) -> CodeCheck {
    let parameter = |name: &str| {
        body.get("parameter")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|p| p.get("name").and_then(Value::as_str) == Some(name))
    };

    let result = parameter("result").and_then(|p| p.get("valueBoolean").and_then(Value::as_bool));
    let message = parameter("message")
        .and_then(|p| p.get("valueString").and_then(Value::as_str))
        .map(str::to_string);

    match result {
        Some(true) => CodeCheck::Valid,
        Some(false) => CodeCheck::Invalid(message.unwrap_or_else(|| {
            format!("The code '{}' is not in the value set {}", code, value_set)
        })),
        None => CodeCheck::Unknown("terminology server returned no result".to_string()),
    }
}

/// Checks membership using only locally loaded resources.
///
/// Returns `None` when the value set is unknown or cannot be expanded
/// locally.
pub fn check_local(
    store: &DefinitionStore,
    value_set: &str,
    system: Option<&str>,
    code: &str,
) -> Option<bool> {
    let vs = store.value_set(value_set)?;

    if let Some(contains) = vs.pointer("/expansion/contains").and_then(Value::as_array) {
        return Some(expansion_contains(contains, system, code));
    }

    let compose = vs.get("compose")?;
    if compose.get("exclude").is_some() {
        return None;
    }

    let mut decidable = true;
    for include in compose.get("include").and_then(Value::as_array)? {
        match include_contains(store, include, system, code) {
            Some(true) => return Some(true),
            Some(false) => {}
            None => decidable = false,
        }
    }
    decidable.then_some(false)
}

fn expansion_contains(contains: &[Value], system: Option<&str>, code: &str) -> bool {
    contains.iter().any(|entry| {
        let matches = entry.get("code").and_then(Value::as_str) == Some(code)
            && system.is_none_or(|s| entry.get("system").and_then(Value::as_str) == Some(s));
        matches
            || entry
                .get("contains")
                .and_then(Value::as_array)
                .is_some_and(|nested| expansion_contains(nested, system, code))
    })
}

fn include_contains(
    store: &DefinitionStore,
    include: &Value,
    system: Option<&str>,
    code: &str,
) -> Option<bool> {
    if include.get("valueSet").is_some() || include.get("filter").is_some() {
        return None;
    }
    let include_system = include.get("system").and_then(Value::as_str)?;
    if system.is_some_and(|s| s != include_system) {
        return Some(false);
    }

    if let Some(concepts) = include.get("concept").and_then(Value::as_array) {
        return Some(
            concepts
                .iter()
                .any(|c| c.get("code").and_then(Value::as_str) == Some(code)),
        );
    }

    let cs = store.code_system(include_system)?;
    if cs.get("content").and_then(Value::as_str) != Some("complete") {
        return None;
    }
    let concepts = cs.get("concept").and_then(Value::as_array)?;
    Some(concept_tree_contains(concepts, code))
}

fn concept_tree_contains(concepts: &[Value], code: &str) -> bool {
    concepts.iter().any(|c| {
        c.get("code").and_then(Value::as_str) == Some(code)
            || c.get("concept")
                .and_then(Value::as_array)
                .is_some_and(|nested| concept_tree_contains(nested, code))
    })
}

/// Checks a code locally, falling back to the terminology server.
pub async fn check_code(
    store: &DefinitionStore,
    client: Option<&TerminologyClient>,
    value_set: &str,
    system: Option<&str>,
    code: &str,
) -> CodeCheck {
    match check_local(store, value_set, system, code) {
        Some(true) => CodeCheck::Valid,
        Some(false) => CodeCheck::Invalid(match system {
            Some(system) => format!(
                "The code '{}' from system '{}' is not in the value set {}",
                code, system, value_set
            ),
            None => format!("The code '{}' is not in the value set {}", code, value_set),
        }),
        None => match client {
            Some(client) => client.validate_code(value_set, system, code).await,
            None => CodeCheck::Unknown(format!(
                "The value set {} cannot be checked without a terminology server",
                value_set
            )),
        },
    }
}
