//! Small hand-written definitions used by the conformance unit tests.

use serde_json::{Value, json};

use super::definitions::DefinitionStore;

const FHIR_TYPE_EXTENSION: &str =
    "http://hl7.org/fhir/StructureDefinition/structuredefinition-fhir-type";

fn primitive(code: &str) -> Value {
    json!({
        "resourceType": "StructureDefinition",
        "url": format!("http://hl7.org/fhir/StructureDefinition/{}", code),
        "id": code,
        "name": code,
        "kind": "primitive-type",
        "type": code,
        "derivation": "specialization",
        "snapshot": {"element": [{"id": code, "path": code, "min": 0, "max": "*"}]}
    })
}

fn element(path: &str, min: u32, max: &str, types: &[&str]) -> Value {
    json!({
        "id": path,
        "path": path,
        "min": min,
        "max": max,
        "type": types.iter().map(|t| json!({"code": t})).collect::<Vec<_>>()
    })
}

fn id_element(path: &str, fhir_type: &str) -> Value {
    json!({
        "id": path,
        "path": path,
        "min": 0,
        "max": "1",
        "type": [{
            "extension": [{"url": FHIR_TYPE_EXTENSION, "valueUrl": fhir_type}],
            "code": "http://hl7.org/fhirpath/System.String"
        }]
    })
}

fn patient_elements() -> Vec<Value> {
    let mut gender = element("Patient.gender", 0, "1", &["code"]);
    gender["binding"] = json!({
        "strength": "required",
        "valueSet": "http://hl7.org/fhir/ValueSet/administrative-gender|4.0.1"
    });
    let mut marital = element("Patient.maritalStatus", 0, "1", &["CodeableConcept"]);
    marital["binding"] = json!({
        "strength": "extensible",
        "valueSet": "http://hl7.org/fhir/ValueSet/marital-status"
    });

    vec![
        element("Patient", 0, "*", &[]),
        id_element("Patient.id", "id"),
        element("Patient.active", 0, "1", &["boolean"]),
        element("Patient.name", 0, "*", &["HumanName"]),
        gender,
        element("Patient.birthDate", 0, "1", &["date"]),
        element("Patient.deceased[x]", 0, "1", &["boolean", "dateTime"]),
        marital,
        element("Patient.contact", 0, "*", &["BackboneElement"]),
        element("Patient.contact.name", 0, "1", &["HumanName"]),
        element("Patient.contained", 0, "*", &["Resource"]),
    ]
}

/// Patient, HumanName, CodeableConcept and their primitives, a constraining
/// `test-patient` profile, a `test-observation` profile and the
/// administrative-gender terminology.
pub(crate) fn fixture_store() -> DefinitionStore {
    let mut store = DefinitionStore::new();

    for code in ["boolean", "string", "code", "id", "uri", "date", "dateTime"] {
        store.add_resource(primitive(code));
    }

    store.add_resource(json!({
        "resourceType": "StructureDefinition",
        "url": "http://hl7.org/fhir/StructureDefinition/HumanName",
        "id": "HumanName",
        "name": "HumanName",
        "kind": "complex-type",
        "type": "HumanName",
        "derivation": "specialization",
        "snapshot": {"element": [
            element("HumanName", 0, "*", &[]),
            element("HumanName.id", 0, "1", &["http://hl7.org/fhirpath/System.String"]),
            element("HumanName.family", 0, "1", &["string"]),
            element("HumanName.given", 0, "*", &["string"])
        ]}
    }));

    store.add_resource(json!({
        "resourceType": "StructureDefinition",
        "url": "http://hl7.org/fhir/StructureDefinition/Coding",
        "id": "Coding",
        "name": "Coding",
        "kind": "complex-type",
        "type": "Coding",
        "derivation": "specialization",
        "snapshot": {"element": [
            element("Coding", 0, "*", &[]),
            element("Coding.system", 0, "1", &["uri"]),
            element("Coding.code", 0, "1", &["code"]),
            element("Coding.display", 0, "1", &["string"])
        ]}
    }));

    store.add_resource(json!({
        "resourceType": "StructureDefinition",
        "url": "http://hl7.org/fhir/StructureDefinition/CodeableConcept",
        "id": "CodeableConcept",
        "name": "CodeableConcept",
        "kind": "complex-type",
        "type": "CodeableConcept",
        "derivation": "specialization",
        "snapshot": {"element": [
            element("CodeableConcept", 0, "*", &[]),
            element("CodeableConcept.coding", 0, "*", &["Coding"]),
            element("CodeableConcept.text", 0, "1", &["string"])
        ]}
    }));

    store.add_resource(json!({
        "resourceType": "StructureDefinition",
        "url": "http://hl7.org/fhir/StructureDefinition/Patient",
        "id": "Patient",
        "name": "Patient",
        "kind": "resource",
        "type": "Patient",
        "abstract": false,
        "derivation": "specialization",
        "snapshot": {"element": patient_elements()}
    }));

    let mut profile_elements = patient_elements();
    for element in &mut profile_elements {
        let path = element["path"].as_str().map(str::to_string);
        match path.as_deref() {
            Some("Patient.name") => element["min"] = json!(1),
            Some("Patient.active") => element["fixedBoolean"] = json!(true),
            _ => {}
        }
    }
    store.add_resource(json!({
        "resourceType": "StructureDefinition",
        "url": "http://example.org/fhir/StructureDefinition/test-patient",
        "id": "test-patient",
        "name": "TestPatient",
        "kind": "resource",
        "type": "Patient",
        "derivation": "constraint",
        "snapshot": {"element": profile_elements}
    }));

    store.add_resource(json!({
        "resourceType": "StructureDefinition",
        "url": "http://example.org/fhir/StructureDefinition/test-observation",
        "id": "test-observation",
        "name": "TestObservation",
        "kind": "resource",
        "type": "Observation",
        "derivation": "constraint",
        "snapshot": {"element": [element("Observation", 0, "*", &[])]}
    }));

    store.add_resource(json!({
        "resourceType": "ValueSet",
        "url": "http://hl7.org/fhir/ValueSet/administrative-gender",
        "compose": {"include": [{"system": "http://hl7.org/fhir/administrative-gender"}]}
    }));
    store.add_resource(json!({
        "resourceType": "CodeSystem",
        "url": "http://hl7.org/fhir/administrative-gender",
        "content": "complete",
        "concept": [
            {"code": "male"}, {"code": "female"}, {"code": "other"}, {"code": "unknown"}
        ]
    }));
    store.add_resource(json!({
        "resourceType": "ValueSet",
        "url": "http://hl7.org/fhir/ValueSet/marital-status",
        "compose": {"include": [{
            "system": "http://terminology.hl7.org/CodeSystem/v3-MaritalStatus",
            "concept": [{"code": "M"}, {"code": "S"}]
        }]}
    }));

    store
}
