//! Conformance resource index.
//!
//! [`DefinitionStore`] holds the StructureDefinitions, ValueSets and
//! CodeSystems of every loaded package, addressable by canonical URL. Profiles
//! can additionally be looked up by their `id` or `name`, which is what callers
//! usually pass (`us-core-patient`).

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::package::Package;

/// Canonical URL prefix of core definitions.
pub const CORE_DEFINITION_BASE: &str = "http://hl7.org/fhir/StructureDefinition/";

/// Extension marking the FHIR type of a `System.*` typed element.
const FHIR_TYPE_EXTENSION: &str =
    "http://hl7.org/fhir/StructureDefinition/structuredefinition-fhir-type";

/// A type allowed for an element.
#[derive(Debug, Clone, Deserialize)]
pub struct TypeRef {
    /// Type code, e.g. `string`, `HumanName`, `Reference`.
    pub code: String,
    #[serde(default)]
    extension: Vec<Value>,
}

impl TypeRef {
    /// The FHIR type to validate against.
    ///
    /// `Resource.id` and similar elements are typed `System.String` with an
    /// extension naming the FHIR primitive (`id`, `uri`); that primitive is
    /// returned in their case.
    pub fn effective_code(&self) -> &str {
        self.extension
            .iter()
            .find(|ext| ext.get("url").and_then(Value::as_str) == Some(FHIR_TYPE_EXTENSION))
            .and_then(|ext| ext.get("valueUrl").or_else(|| ext.get("valueUri")))
            .and_then(Value::as_str)
            .unwrap_or(&self.code)
    }
}

/// A terminology binding.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    /// `required`, `extensible`, `preferred` or `example`.
    pub strength: String,
    /// Bound value set canonical.
    pub value_set: Option<String>,
}

/// One element of a StructureDefinition snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinition {
    /// Element id, unique within the snapshot.
    #[serde(default)]
    pub id: Option<String>,
    /// Element path, e.g. `Patient.name.family`.
    pub path: String,
    /// Slice name when this element defines a slice.
    #[serde(default)]
    pub slice_name: Option<String>,
    /// Minimum cardinality.
    #[serde(default)]
    pub min: Option<u32>,
    /// Maximum cardinality, a number or `*`.
    #[serde(default)]
    pub max: Option<String>,
    /// Allowed types.
    #[serde(default, rename = "type")]
    pub types: Vec<TypeRef>,
    /// Terminology binding.
    #[serde(default)]
    pub binding: Option<Binding>,
    /// `#Path` reference to another element's definition.
    #[serde(default)]
    pub content_reference: Option<String>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl ElementDefinition {
    /// The last path segment, without `[x]`.
    pub fn name(&self) -> &str {
        let last = self.path.rsplit('.').next().unwrap_or(&self.path);
        last.strip_suffix("[x]").unwrap_or(last)
    }

    /// True for polymorphic `[x]` elements.
    pub fn is_choice(&self) -> bool {
        self.path.ends_with("[x]")
    }

    /// True when more than one occurrence is allowed.
    pub fn is_repeating(&self) -> bool {
        match self.max.as_deref() {
            Some("*") => true,
            Some(max) => max.parse::<u32>().map(|m| m > 1).unwrap_or(false),
            None => false,
        }
    }

    /// Numeric maximum; `None` for `*` or absent.
    pub fn max_count(&self) -> Option<usize> {
        self.max.as_deref().and_then(|m| m.parse().ok())
    }

    /// The `fixed[x]` value, if any.
    pub fn fixed(&self) -> Option<&Value> {
        self.prefixed_value("fixed")
    }

    /// The `pattern[x]` value, if any.
    pub fn pattern(&self) -> Option<&Value> {
        self.prefixed_value("pattern")
    }

    fn prefixed_value(&self, prefix: &str) -> Option<&Value> {
        self.rest.iter().find_map(|(key, value)| {
            key.strip_prefix(prefix)
                .filter(|rest| rest.starts_with(|c: char| c.is_ascii_uppercase()))
                .map(|_| value)
        })
    }

    /// Resolves the JSON property name to the type it carries.
    ///
    /// For `value[x]` the key `valueQuantity` yields `Quantity`. For other
    /// elements the key must equal the element name and the single declared
    /// type is returned.
    pub fn type_for_key(&self, key: &str) -> Option<&str> {
        if self.is_choice() {
            let suffix = key.strip_prefix(self.name())?;
            self.types
                .iter()
                .find(|t| capitalize(&t.code) == suffix)
                .map(TypeRef::effective_code)
        } else if key == self.name() {
            Some(self.types.first().map(TypeRef::effective_code).unwrap_or(""))
        } else {
            None
        }
    }
}

/// Upper-cases the first character.
pub fn capitalize(code: &str) -> String {
    let mut chars = code.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    #[serde(default)]
    element: Vec<ElementDefinition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStructureDefinition {
    url: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    kind: String,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default, rename = "abstract")]
    is_abstract: bool,
    #[serde(default)]
    derivation: Option<String>,
    #[serde(default)]
    snapshot: Option<Snapshot>,
}

/// A StructureDefinition reduced to what instance validation needs.
#[derive(Debug)]
pub struct StructureDefinition {
    /// Canonical URL.
    pub url: String,
    /// Resource id.
    pub id: Option<String>,
    /// Computer-friendly name.
    pub name: Option<String>,
    /// `primitive-type`, `complex-type`, `resource` or `logical`.
    pub kind: String,
    /// The type this definition describes or constrains.
    pub type_name: String,
    /// Abstract types cannot be instantiated.
    pub is_abstract: bool,
    /// `specialization` or `constraint`.
    pub derivation: Option<String>,
    elements: Vec<ElementDefinition>,
    children: HashMap<String, Vec<usize>>,
}

impl StructureDefinition {
    /// Parses a StructureDefinition resource. Returns `None` without a snapshot.
    pub fn from_value(value: Value) -> Option<Self> {
        let raw: RawStructureDefinition = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "Skipping unreadable StructureDefinition");
                return None;
            }
        };
        let elements = raw.snapshot?.element;

        let mut children: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, element) in elements.iter().enumerate() {
            // Slices and their descendants are not walked.
            let in_slice = element.slice_name.is_some()
                || element.id.as_deref().is_some_and(|id| id.contains(':'));
            if in_slice {
                continue;
            }
            if let Some((parent, _)) = element.path.rsplit_once('.') {
                children.entry(parent.to_string()).or_default().push(index);
            }
        }

        Some(Self {
            url: raw.url,
            id: raw.id,
            name: raw.name,
            kind: raw.kind,
            type_name: raw.type_name,
            is_abstract: raw.is_abstract,
            derivation: raw.derivation,
            elements,
            children,
        })
    }

    /// Direct child elements of `path`.
    pub fn children<'a>(
        &'a self,
        path: &str,
    ) -> impl Iterator<Item = &'a ElementDefinition> + use<'a> {
        self.children
            .get(path)
            .into_iter()
            .flatten()
            .map(|&index| &self.elements[index])
    }

    /// True when `path` has child elements in this snapshot.
    pub fn has_children(&self, path: &str) -> bool {
        self.children.contains_key(path)
    }

    /// Looks up an element by path, ignoring slices.
    pub fn element(&self, path: &str) -> Option<&ElementDefinition> {
        self.elements
            .iter()
            .find(|e| e.path == path && e.slice_name.is_none())
    }

    /// True for a profile (constraint) rather than a base definition.
    pub fn is_constraint(&self) -> bool {
        self.derivation.as_deref() == Some("constraint")
    }
}

/// All conformance resources available to the engine.
#[derive(Debug, Default)]
pub struct DefinitionStore {
    structures: HashMap<String, Arc<StructureDefinition>>,
    aliases: HashMap<String, String>,
    value_sets: HashMap<String, Value>,
    code_systems: HashMap<String, Value>,
    packages: Vec<String>,
}

impl DefinitionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every conformance resource of a package.
    ///
    /// Later packages do not replace definitions already present, so the core
    /// specification wins over redefinitions in implementation guides.
    pub fn add_package(&mut self, package: Package) {
        self.packages
            .push(format!("{}#{}", package.name, package.version));
        for resource in package.resources {
            self.add_resource(resource);
        }
    }

    /// Adds one conformance resource.
    pub fn add_resource(&mut self, resource: Value) {
        let resource_type = resource
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let url = resource
            .get("url")
            .and_then(Value::as_str)
            .map(strip_version);

        match (resource_type, url) {
            ("StructureDefinition", Some(_)) => {
                if let Some(sd) = StructureDefinition::from_value(resource) {
                    self.add_structure(sd);
                }
            }
            ("ValueSet", Some(url)) => {
                let url = url.to_string();
                self.value_sets.entry(url).or_insert(resource);
            }
            ("CodeSystem", Some(url)) => {
                let url = url.to_string();
                self.code_systems.entry(url).or_insert(resource);
            }
            _ => {}
        }
    }

    fn add_structure(&mut self, sd: StructureDefinition) {
        let url = strip_version(&sd.url).to_string();
        if self.structures.contains_key(&url) {
            return;
        }
        for alias in [sd.id.as_deref(), sd.name.as_deref()].into_iter().flatten() {
            self.aliases
                .entry(alias.to_string())
                .or_insert_with(|| url.clone());
        }
        self.structures.insert(url, Arc::new(sd));
    }

    /// Packages loaded into this store, as `name#version`.
    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    /// Number of StructureDefinitions held.
    pub fn structure_count(&self) -> usize {
        self.structures.len()
    }

    /// Resolves a profile by canonical URL (with or without `|version`), id or name.
    pub fn resolve_profile(&self, identifier: &str) -> Option<Arc<StructureDefinition>> {
        let identifier = identifier.trim();
        self.structures
            .get(strip_version(identifier))
            .or_else(|| {
                self.aliases
                    .get(identifier)
                    .and_then(|url| self.structures.get(url))
            })
            .cloned()
    }

    /// The base definition of a resource or data type, e.g. `Patient`, `HumanName`.
    pub fn base_definition(&self, type_name: &str) -> Option<Arc<StructureDefinition>> {
        self.structures
            .get(&format!("{}{}", CORE_DEFINITION_BASE, type_name))
            .filter(|sd| !sd.is_constraint())
            .cloned()
    }

    /// The base definition of a concrete resource type.
    pub fn resource_definition(&self, type_name: &str) -> Option<Arc<StructureDefinition>> {
        self.base_definition(type_name)
            .filter(|sd| sd.kind == "resource" && !sd.is_abstract)
    }

    /// A ValueSet by canonical URL.
    pub fn value_set(&self, url: &str) -> Option<&Value> {
        self.value_sets.get(strip_version(url))
    }

    /// A CodeSystem by canonical URL.
    pub fn code_system(&self, url: &str) -> Option<&Value> {
        self.code_systems.get(strip_version(url))
    }
}

/// Drops a `|version` suffix from a canonical URL.
pub fn strip_version(url: &str) -> &str {
    url.split_once('|').map(|(base, _)| base).unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patient_sd() -> Value {
        json!({
            "resourceType": "StructureDefinition",
            "url": "http://hl7.org/fhir/StructureDefinition/Patient",
            "id": "Patient",
            "name": "Patient",
            "kind": "resource",
            "type": "Patient",
            "abstract": false,
            "derivation": "specialization",
            "snapshot": {"element": [
                {"id": "Patient", "path": "Patient", "min": 0, "max": "*"},
                {"id": "Patient.active", "path": "Patient.active", "min": 0, "max": "1",
                 "type": [{"code": "boolean"}]},
                {"id": "Patient.deceased[x]", "path": "Patient.deceased[x]", "min": 0, "max": "1",
                 "type": [{"code": "boolean"}, {"code": "dateTime"}]},
                {"id": "Patient.identifier", "path": "Patient.identifier", "min": 0, "max": "*",
                 "type": [{"code": "Identifier"}]},
                {"id": "Patient.identifier:mrn", "path": "Patient.identifier", "sliceName": "mrn",
                 "min": 0, "max": "1", "type": [{"code": "Identifier"}]}
            ]}
        })
    }

    #[test]
    fn test_children_skip_slices() {
        let sd = StructureDefinition::from_value(patient_sd()).unwrap();
        let names: Vec<_> = sd.children("Patient").map(|e| e.name()).collect();
        assert_eq!(names, vec!["active", "deceased", "identifier"]);
        assert!(sd.has_children("Patient"));
        assert!(!sd.has_children("Patient.active"));
    }

    #[test]
    fn test_choice_type_for_key() {
        let sd = StructureDefinition::from_value(patient_sd()).unwrap();
        let deceased = sd.element("Patient.deceased[x]").unwrap();

        assert!(deceased.is_choice());
        assert_eq!(deceased.type_for_key("deceasedBoolean"), Some("boolean"));
        assert_eq!(deceased.type_for_key("deceasedDateTime"), Some("dateTime"));
        assert_eq!(deceased.type_for_key("deceasedString"), None);
    }

    #[test]
    fn test_fixed_and_pattern() {
        let element: ElementDefinition = serde_json::from_value(json!({
            "path": "Observation.status",
            "fixedCode": "final",
            "patternCodeableConcept": {"coding": [{"code": "x"}]}
        }))
        .unwrap();

        assert_eq!(element.fixed(), Some(&json!("final")));
        assert!(element.pattern().is_some());
        assert!(!element.is_repeating());
    }

    #[test]
    fn test_system_type_with_fhir_type_extension() {
        let element: ElementDefinition = serde_json::from_value(json!({
            "path": "Patient.id",
            "max": "1",
            "type": [{
                "extension": [{
                    "url": "http://hl7.org/fhir/StructureDefinition/structuredefinition-fhir-type",
                    "valueUrl": "id"
                }],
                "code": "http://hl7.org/fhirpath/System.String"
            }]
        }))
        .unwrap();

        assert_eq!(element.type_for_key("id"), Some("id"));
    }

    #[test]
    fn test_resolve_profile_by_url_id_and_name() {
        let mut store = DefinitionStore::new();
        store.add_resource(json!({
            "resourceType": "StructureDefinition",
            "url": "http://hl7.org/fhir/us/core/StructureDefinition/us-core-patient",
            "id": "us-core-patient",
            "name": "USCorePatientProfile",
            "kind": "resource",
            "type": "Patient",
            "derivation": "constraint",
            "snapshot": {"element": [{"path": "Patient"}]}
        }));

        for identifier in [
            "http://hl7.org/fhir/us/core/StructureDefinition/us-core-patient",
            "http://hl7.org/fhir/us/core/StructureDefinition/us-core-patient|7.0.0",
            "us-core-patient",
            "USCorePatientProfile",
        ] {
            let sd = store.resolve_profile(identifier).unwrap();
            assert_eq!(sd.type_name, "Patient");
        }
        assert!(store.resolve_profile("unknown-profile").is_none());
    }

    #[test]
    fn test_first_definition_wins() {
        let mut store = DefinitionStore::new();
        store.add_resource(patient_sd());
        let mut redefined = patient_sd();
        redefined["kind"] = json!("logical");
        store.add_resource(redefined);

        assert_eq!(store.structure_count(), 1);
        assert!(store.resource_definition("Patient").is_some());
    }

    #[test]
    fn test_strip_version() {
        assert_eq!(strip_version("http://x/vs|1.0"), "http://x/vs");
        assert_eq!(strip_version("http://x/vs"), "http://x/vs");
    }
}
