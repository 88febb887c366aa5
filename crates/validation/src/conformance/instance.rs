//! Structural validation of a FHIR JSON instance.
//!
//! The walker runs in two modes:
//!
//! - **Base**: the instance is checked against the core definition of its
//!   resource type and the definitions of every data type it uses. Unknown
//!   properties, array/single-value shape, cardinality and primitive value
//!   formats are reported.
//! - **Profile**: the instance is checked against a profile's snapshot. Only
//!   the constraints a profile adds on top of the base are reported:
//!   cardinality, fixed values and patterns.
//!
//! Both modes collect the coded values that fall under a `required` or
//! `extensible` binding. Checking those needs terminology access, so they are
//! returned as [`PendingBinding`]s instead of being resolved here.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::{Map, Value};

use super::definitions::{DefinitionStore, ElementDefinition, StructureDefinition};
use crate::outcome::{Issue, IssueType};

const SYSTEM_TYPE_PREFIX: &str = "http://hl7.org/fhirpath/System.";

static DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2][0-9]|3[0-1]))?)?$")
        .expect("date pattern")
});

static DATE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2][0-9]|3[0-1])(T([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?(Z|(\+|-)((0[0-9]|1[0-3]):[0-5][0-9]|14:00)))?)?)?$")
        .expect("dateTime pattern")
});

static INSTANT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)-(0[1-9]|1[0-2])-(0[1-9]|[1-2][0-9]|3[0-1])T([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?(Z|(\+|-)((0[0-9]|1[0-3]):[0-5][0-9]|14:00))$")
        .expect("instant pattern")
});

static TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?$").expect("time pattern")
});

static ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\-\.]{1,64}$").expect("id pattern"));

static CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s]+( [^\s]+)*$").expect("code pattern"));

/// Binding strengths that produce issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStrength {
    /// Codes must come from the value set.
    Required,
    /// Codes should come from the value set.
    Extensible,
}

impl BindingStrength {
    fn parse(strength: &str) -> Option<Self> {
        match strength {
            "required" => Some(Self::Required),
            "extensible" => Some(Self::Extensible),
            _ => None,
        }
    }
}

/// A coded value awaiting a terminology check.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBinding {
    /// Location of the coded element.
    pub expression: String,
    /// Bound value set canonical.
    pub value_set: String,
    /// Binding strength.
    pub strength: BindingStrength,
    /// `(system, code)` pairs; a `code` element has no system.
    pub codings: Vec<(Option<String>, String)>,
}

/// Everything the walk found.
#[derive(Debug, Default)]
pub struct WalkReport {
    /// Structural issues.
    pub issues: Vec<Issue>,
    /// Coded values to check against their value sets.
    pub bindings: Vec<PendingBinding>,
}

impl WalkReport {
    fn error(&mut self, code: IssueType, expression: &str, diagnostics: impl Into<String>) {
        let issue = Issue::error(code, diagnostics);
        self.issues.push(if expression.is_empty() {
            issue
        } else {
            issue.with_expression(expression)
        });
    }
}

/// Validates `resource` against the base definitions and each of `profiles`.
pub fn validate_instance(
    store: &DefinitionStore,
    resource: &Value,
    profiles: &[Arc<StructureDefinition>],
) -> WalkReport {
    let mut walker = Walker {
        store,
        report: WalkReport::default(),
    };

    let Some(object) = resource.as_object() else {
        walker.report.error(
            IssueType::Structure,
            "",
            "The document is not a JSON object",
        );
        return walker.report;
    };

    let root = walker.walk_resource(object, None);
    if let Some(root) = root {
        for profile in profiles {
            walker.walk_profile_root(profile, object, &root);
        }
    }
    walker.report
}

struct Walker<'a> {
    store: &'a DefinitionStore,
    report: WalkReport,
}

impl Walker<'_> {
    /// Checks a resource against its base definition. Returns the expression
    /// root used for its issues, or `None` if the type is unknown.
    fn walk_resource(&mut self, object: &Map<String, Value>, at: Option<&str>) -> Option<String> {
        let resource_type = match object.get("resourceType") {
            Some(Value::String(rt)) => rt.as_str(),
            _ => {
                self.report.error(
                    IssueType::Structure,
                    at.unwrap_or(""),
                    "Unable to find resourceType property",
                );
                return None;
            }
        };
        let expression = at.map(str::to_string).unwrap_or_else(|| resource_type.to_string());

        let Some(definition) = self.store.resource_definition(resource_type) else {
            self.report.error(
                IssueType::Structure,
                &expression,
                format!("Unknown resource type '{}'", resource_type),
            );
            return None;
        };

        self.walk_object(&definition, &definition.type_name, object, &expression, true);
        Some(expression)
    }

    fn walk_object(
        &mut self,
        definition: &StructureDefinition,
        path: &str,
        object: &Map<String, Value>,
        expression: &str,
        is_resource_root: bool,
    ) {
        let children: Vec<&ElementDefinition> = definition.children(path).collect();

        for (key, value) in object {
            if is_resource_root && key == "resourceType" {
                continue;
            }
            let child_expression = format!("{}.{}", expression, key);

            if let Some(base_key) = key.strip_prefix('_') {
                let known = children.iter().any(|e| e.type_for_key(base_key).is_some());
                if !known {
                    self.unknown_property(key, &child_expression);
                }
                continue;
            }

            let Some((element, type_code)) = children
                .iter()
                .find_map(|e| e.type_for_key(key).map(|t| (*e, t)))
            else {
                self.unknown_property(key, &child_expression);
                continue;
            };

            match (element.is_repeating(), value) {
                (true, Value::Array(items)) => {
                    for (index, item) in items.iter().enumerate() {
                        let item_expression = format!("{}[{}]", child_expression, index);
                        self.walk_value(definition, element, type_code, item, &item_expression);
                    }
                }
                (true, _) => self.report.error(
                    IssueType::Structure,
                    &child_expression,
                    format!(
                        "This property must be an Array, not {}",
                        describe(value)
                    ),
                ),
                (false, Value::Array(_)) => self.report.error(
                    IssueType::Structure,
                    &child_expression,
                    "This property must be a single value, not an array",
                ),
                (false, _) => {
                    self.walk_value(definition, element, type_code, value, &child_expression)
                }
            }
        }

        for element in &children {
            self.check_cardinality(element, object, expression, None);
        }
    }

    fn unknown_property(&mut self, key: &str, expression: &str) {
        self.report.error(
            IssueType::Structure,
            expression,
            format!("Unrecognized property '{}'", key),
        );
    }

    fn walk_value(
        &mut self,
        definition: &StructureDefinition,
        element: &ElementDefinition,
        type_code: &str,
        value: &Value,
        expression: &str,
    ) {
        self.collect_binding(element, type_code, value, expression);

        if let Some(reference) = element.content_reference.as_deref() {
            let path = reference.rsplit_once('#').map(|(_, p)| p).unwrap_or(reference);
            if let Some(object) = self.expect_object(value, expression) {
                self.walk_object(definition, path, object, expression, false);
            }
            return;
        }

        if type_code.is_empty() || type_code.starts_with(SYSTEM_TYPE_PREFIX) {
            check_system_value(type_code, value, expression, &mut self.report);
            return;
        }

        if type_code == "Resource" || type_code == "DomainResource" {
            if let Some(object) = self.expect_object(value, expression) {
                self.walk_resource(object, Some(expression));
            }
            return;
        }

        if definition.has_children(&element.path) {
            if let Some(object) = self.expect_object(value, expression) {
                self.walk_object(definition, &element.path, object, expression, false);
            }
            return;
        }

        let Some(type_definition) = self.store.base_definition(type_code) else {
            return;
        };
        if type_definition.kind == "primitive-type" {
            check_primitive(type_code, value, expression, &mut self.report);
        } else if let Some(object) = self.expect_object(value, expression) {
            self.walk_object(
                &type_definition,
                &type_definition.type_name,
                object,
                expression,
                false,
            );
        }
    }

    fn expect_object<'v>(
        &mut self,
        value: &'v Value,
        expression: &str,
    ) -> Option<&'v Map<String, Value>> {
        match value {
            Value::Object(object) => Some(object),
            other => {
                self.report.error(
                    IssueType::Structure,
                    expression,
                    format!("This property must be an object, not {}", describe(other)),
                );
                None
            }
        }
    }

    fn check_cardinality(
        &mut self,
        element: &ElementDefinition,
        object: &Map<String, Value>,
        expression: &str,
        profile: Option<&str>,
    ) {
        let found = occurrences(element, object);
        let source = profile
            .map(|url| format!(" (from {})", url))
            .unwrap_or_default();
        let element_expression = format!("{}.{}", expression, element.name());

        let min = element.min.unwrap_or(0) as usize;
        if found < min {
            self.report.error(
                IssueType::Required,
                &element_expression,
                format!(
                    "{}: minimum required = {}, but only found {}{}",
                    element.path, min, found, source
                ),
            );
        }
        if let Some(max) = element.max_count()
            && found > max
        {
            self.report.error(
                IssueType::Structure,
                &element_expression,
                format!(
                    "{}: max allowed = {}, but found {}{}",
                    element.path, max, found, source
                ),
            );
        }
    }

    fn collect_binding(
        &mut self,
        element: &ElementDefinition,
        type_code: &str,
        value: &Value,
        expression: &str,
    ) {
        let Some(binding) = element.binding.as_ref() else {
            return;
        };
        let (Some(strength), Some(value_set)) = (
            BindingStrength::parse(&binding.strength),
            binding.value_set.as_deref(),
        ) else {
            return;
        };

        let codings = match type_code {
            "code" => value
                .as_str()
                .map(|code| vec![(None, code.to_string())])
                .unwrap_or_default(),
            "Coding" => coding_pair(value).into_iter().collect(),
            "CodeableConcept" => value
                .get("coding")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(coding_pair)
                .collect(),
            _ => return,
        };
        if codings.is_empty() {
            return;
        }

        self.report.bindings.push(PendingBinding {
            expression: expression.to_string(),
            value_set: value_set.to_string(),
            strength,
            codings,
        });
    }

    fn walk_profile_root(
        &mut self,
        profile: &StructureDefinition,
        object: &Map<String, Value>,
        expression: &str,
    ) {
        let resource_type = object
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if profile.type_name != resource_type {
            self.report.error(
                IssueType::Invalid,
                expression,
                format!(
                    "Profile {} applies to {} resources, not {}",
                    profile.url, profile.type_name, resource_type
                ),
            );
            return;
        }
        self.walk_profile(profile, &profile.type_name, object, expression);
    }

    fn walk_profile(
        &mut self,
        profile: &StructureDefinition,
        path: &str,
        object: &Map<String, Value>,
        expression: &str,
    ) {
        let base = self.store.base_definition(&profile.type_name);
        let children: Vec<&ElementDefinition> = profile.children(path).collect();
        for element in children {
            // Cardinality inherited unchanged is already reported by the base walk.
            let inherited = base
                .as_ref()
                .and_then(|b| b.element(&element.path))
                .is_some_and(|b| b.min == element.min && b.max == element.max);
            if !inherited {
                self.check_cardinality(element, object, expression, Some(&profile.url));
            }

            for (key, value) in object {
                let Some(type_code) = element.type_for_key(key) else {
                    continue;
                };
                let child_expression = format!("{}.{}", expression, key);
                let items: Vec<(String, &Value)> = match value {
                    Value::Array(items) => items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| (format!("{}[{}]", child_expression, i), item))
                        .collect(),
                    single => vec![(child_expression.clone(), single)],
                };

                for (item_expression, item) in items {
                    self.check_fixed_and_pattern(profile, element, item, &item_expression);
                    self.collect_binding(element, type_code, item, &item_expression);
                    if let Value::Object(child) = item
                        && profile.has_children(&element.path)
                    {
                        self.walk_profile(profile, &element.path, child, &item_expression);
                    }
                }
            }
        }
    }

    fn check_fixed_and_pattern(
        &mut self,
        profile: &StructureDefinition,
        element: &ElementDefinition,
        value: &Value,
        expression: &str,
    ) {
        if let Some(fixed) = element.fixed()
            && value != fixed
        {
            self.report.error(
                IssueType::Value,
                expression,
                format!(
                    "Value must be exactly {} (from {})",
                    fixed, profile.url
                ),
            );
        }
        if let Some(pattern) = element.pattern()
            && !matches_pattern(value, pattern)
        {
            self.report.error(
                IssueType::Value,
                expression,
                format!(
                    "Value does not match the required pattern {} (from {})",
                    pattern, profile.url
                ),
            );
        }
    }
}

/// Number of occurrences of `element` in `object`, counting `_name`
/// extension-only primitives.
fn occurrences(element: &ElementDefinition, object: &Map<String, Value>) -> usize {
    object
        .iter()
        .filter_map(|(key, value)| {
            if element.type_for_key(key).is_some() {
                Some(match value {
                    Value::Array(items) => items.len(),
                    _ => 1,
                })
            } else {
                let base = key.strip_prefix('_')?;
                let has_value = object.contains_key(base);
                (element.type_for_key(base).is_some() && !has_value).then_some(match value {
                    Value::Array(items) => items.len(),
                    _ => 1,
                })
            }
        })
        .sum()
}

/// `pattern` matches when every property it carries is present in `value`
/// with a matching value; arrays match when each pattern item matches some
/// value item.
pub fn matches_pattern(value: &Value, pattern: &Value) -> bool {
    match (value, pattern) {
        (Value::Object(value), Value::Object(pattern)) => pattern.iter().all(|(key, expected)| {
            value
                .get(key)
                .is_some_and(|actual| matches_pattern(actual, expected))
        }),
        (Value::Array(values), Value::Array(patterns)) => patterns
            .iter()
            .all(|p| values.iter().any(|v| matches_pattern(v, p))),
        (value, pattern) => value == pattern,
    }
}

fn coding_pair(coding: &Value) -> Option<(Option<String>, String)> {
    let code = coding.get("code").and_then(Value::as_str)?;
    let system = coding
        .get("system")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some((system, code.to_string()))
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn check_system_value(type_code: &str, value: &Value, expression: &str, report: &mut WalkReport) {
    let system_type = type_code.strip_prefix(SYSTEM_TYPE_PREFIX).unwrap_or("String");
    let ok = match system_type {
        "Boolean" => value.is_boolean(),
        "Integer" => value.is_i64() || value.is_u64(),
        "Decimal" => value.is_number(),
        _ => value.as_str().is_some_and(|s| !s.is_empty()),
    };
    if !ok {
        report.error(
            IssueType::Structure,
            expression,
            format!("Invalid value {} for System.{}", describe(value), system_type),
        );
    }
}

/// Checks a FHIR primitive's JSON representation and lexical form.
pub fn check_primitive(type_code: &str, value: &Value, expression: &str, report: &mut WalkReport) {
    let kind_error = |expected: &str| {
        format!(
            "Error parsing JSON: the primitive value must be {} (found {})",
            expected,
            describe(value)
        )
    };

    match type_code {
        "boolean" => {
            if !value.is_boolean() {
                report.error(IssueType::Structure, expression, kind_error("a boolean"));
            }
        }
        "integer" | "positiveInt" | "unsignedInt" => {
            let Some(number) = value.as_i64() else {
                report.error(IssueType::Structure, expression, kind_error("an integer"));
                return;
            };
            let in_range = match type_code {
                "positiveInt" => number > 0 && number <= i32::MAX as i64,
                "unsignedInt" => (0..=i32::MAX as i64).contains(&number),
                _ => (i32::MIN as i64..=i32::MAX as i64).contains(&number),
            };
            if !in_range {
                report.error(
                    IssueType::Value,
                    expression,
                    format!("The value {} is out of range for {}", number, type_code),
                );
            }
        }
        "decimal" => {
            if !value.is_number() {
                report.error(IssueType::Structure, expression, kind_error("a number"));
            }
        }
        _ => {
            let Some(text) = value.as_str() else {
                report.error(IssueType::Structure, expression, kind_error("a string"));
                return;
            };
            if text.is_empty() {
                report.error(IssueType::Value, expression, "@value cannot be empty");
                return;
            }
            let pattern = match type_code {
                "date" => Some(&*DATE),
                "dateTime" => Some(&*DATE_TIME),
                "instant" => Some(&*INSTANT),
                "time" => Some(&*TIME),
                "id" => Some(&*ID),
                "code" => Some(&*CODE),
                _ => None,
            };
            if pattern.is_some_and(|re| !re.is_match(text)) {
                report.error(
                    IssueType::Value,
                    expression,
                    format!("The value '{}' is not a valid {}", text, type_code),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::test_support::fixture_store;
    use serde_json::json;

    fn walk(resource: Value, profiles: &[&str]) -> WalkReport {
        let store = fixture_store();
        let profiles: Vec<_> = profiles
            .iter()
            .map(|p| store.resolve_profile(p).unwrap())
            .collect();
        validate_instance(&store, &resource, &profiles)
    }

    fn diagnostics(report: &WalkReport) -> Vec<String> {
        report
            .issues
            .iter()
            .filter_map(|i| i.diagnostics.clone())
            .collect()
    }

    #[test]
    fn test_valid_patient_has_no_issues() {
        let report = walk(
            json!({
                "resourceType": "Patient",
                "id": "example",
                "active": true,
                "name": [{"family": "Chalmers", "given": ["Peter", "James"]}],
                "birthDate": "1974-12-25"
            }),
            &[],
        );
        assert!(report.issues.is_empty(), "{:?}", diagnostics(&report));
    }

    #[test]
    fn test_unknown_property() {
        let report = walk(
            json!({"resourceType": "Patient", "nickname": "Pete"}),
            &[],
        );
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].expression, vec!["Patient.nickname"]);
        assert!(diagnostics(&report)[0].contains("Unrecognized property 'nickname'"));
    }

    #[test]
    fn test_unknown_property_in_data_type() {
        let report = walk(
            json!({"resourceType": "Patient", "name": [{"surname": "Chalmers"}]}),
            &[],
        );
        assert_eq!(report.issues[0].expression, vec!["Patient.name[0].surname"]);
    }

    #[test]
    fn test_array_shape() {
        let report = walk(
            json!({"resourceType": "Patient", "name": {"family": "Chalmers"}, "active": [true]}),
            &[],
        );
        let messages = diagnostics(&report);
        assert!(messages.iter().any(|m| m.contains("must be an Array")));
        assert!(messages.iter().any(|m| m.contains("must be a single value")));
    }

    #[test]
    fn test_primitive_formats() {
        let report = walk(
            json!({
                "resourceType": "Patient",
                "id": "has spaces",
                "active": "yes",
                "birthDate": "1974-13-01"
            }),
            &[],
        );
        let expressions: Vec<_> = report
            .issues
            .iter()
            .flat_map(|i| i.expression.clone())
            .collect();
        assert!(expressions.contains(&"Patient.id".to_string()));
        assert!(expressions.contains(&"Patient.active".to_string()));
        assert!(expressions.contains(&"Patient.birthDate".to_string()));
    }

    #[test]
    fn test_choice_type() {
        let ok = walk(
            json!({"resourceType": "Patient", "deceasedDateTime": "2015-02-07T13:28:17-05:00"}),
            &[],
        );
        assert!(ok.issues.is_empty(), "{:?}", diagnostics(&ok));

        let bad = walk(
            json!({"resourceType": "Patient", "deceasedString": "yes"}),
            &[],
        );
        assert!(diagnostics(&bad)[0].contains("deceasedString"));
    }

    #[test]
    fn test_primitive_extension_key_is_allowed() {
        let report = walk(
            json!({"resourceType": "Patient", "_birthDate": {"id": "b1"}}),
            &[],
        );
        assert!(report.issues.is_empty(), "{:?}", diagnostics(&report));
    }

    #[test]
    fn test_missing_or_unknown_resource_type() {
        let report = walk(json!({"id": "x"}), &[]);
        assert!(diagnostics(&report)[0].contains("resourceType"));

        let report = walk(json!({"resourceType": "Spaceship"}), &[]);
        assert!(diagnostics(&report)[0].contains("Unknown resource type 'Spaceship'"));
    }

    #[test]
    fn test_required_binding_is_collected() {
        let report = walk(json!({"resourceType": "Patient", "gender": "M"}), &[]);
        assert_eq!(report.bindings.len(), 1);
        let binding = &report.bindings[0];
        assert_eq!(binding.expression, "Patient.gender");
        assert_eq!(binding.strength, BindingStrength::Required);
        assert_eq!(binding.codings, vec![(None, "M".to_string())]);
    }

    #[test]
    fn test_profile_cardinality() {
        let report = walk(
            json!({"resourceType": "Patient", "active": true}),
            &["test-patient"],
        );
        let messages = diagnostics(&report);
        assert_eq!(messages.len(), 1, "{:?}", messages);
        assert!(messages[0].contains("Patient.name: minimum required = 1, but only found 0"));
        assert_eq!(report.issues[0].code, IssueType::Required);
    }

    #[test]
    fn test_profile_fixed_value() {
        let report = walk(
            json!({
                "resourceType": "Patient",
                "active": false,
                "name": [{"family": "Chalmers"}]
            }),
            &["http://example.org/fhir/StructureDefinition/test-patient"],
        );
        let messages = diagnostics(&report);
        assert_eq!(messages.len(), 1, "{:?}", messages);
        assert!(messages[0].contains("Value must be exactly true"));
        assert_eq!(report.issues[0].expression, vec!["Patient.active"]);
    }

    #[test]
    fn test_profile_for_other_type() {
        let report = walk(
            json!({"resourceType": "Patient", "name": [{"family": "Chalmers"}]}),
            &["test-observation"],
        );
        assert!(diagnostics(&report)[0].contains("applies to Observation resources"));
    }

    #[test]
    fn test_pattern_matching() {
        let pattern = json!({"coding": [{"system": "http://loinc.org", "code": "1234-5"}]});
        let value = json!({
            "coding": [
                {"system": "http://snomed.info/sct", "code": "1"},
                {"system": "http://loinc.org", "code": "1234-5", "display": "Test"}
            ],
            "text": "Test"
        });
        assert!(matches_pattern(&value, &pattern));
        assert!(!matches_pattern(&json!({"text": "Test"}), &pattern));
    }
}
