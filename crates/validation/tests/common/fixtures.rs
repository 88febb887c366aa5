//! FHIR documents and conformance packages used by the tests.

use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::{Value, json};

/// A minimal valid Patient.
pub fn minimal_patient() -> Value {
    json!({
        "resourceType": "Patient",
        "id": "example",
        "active": true,
        "name": [{"family": "Chalmers", "given": ["Peter"]}],
        "gender": "male",
        "birthDate": "1974-12-25"
    })
}

fn structure(
    url: &str,
    id: &str,
    kind: &str,
    type_name: &str,
    derivation: &str,
    elements: Vec<Value>,
) -> Value {
    json!({
        "resourceType": "StructureDefinition",
        "url": url,
        "id": id,
        "name": id,
        "kind": kind,
        "type": type_name,
        "abstract": false,
        "derivation": derivation,
        "snapshot": {"element": elements}
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

fn patient_elements(name_min: u32) -> Vec<Value> {
    let mut gender = element("Patient.gender", 0, "1", &["code"]);
    gender["binding"] = json!({
        "strength": "required",
        "valueSet": "http://hl7.org/fhir/ValueSet/administrative-gender|4.0.1"
    });
    vec![
        element("Patient", 0, "*", &[]),
        json!({
            "id": "Patient.id",
            "path": "Patient.id",
            "min": 0,
            "max": "1",
            "type": [{
                "extension": [{
                    "url": "http://hl7.org/fhir/StructureDefinition/structuredefinition-fhir-type",
                    "valueUrl": "id"
                }],
                "code": "http://hl7.org/fhirpath/System.String"
            }]
        }),
        element("Patient.active", 0, "1", &["boolean"]),
        element("Patient.name", name_min, "*", &["HumanName"]),
        gender,
        element("Patient.birthDate", 0, "1", &["date"]),
    ]
}

/// Conformance resources standing in for the FHIR core package.
pub fn core_resources() -> Vec<Value> {
    let mut resources: Vec<Value> = ["boolean", "string", "code", "id", "date"]
        .iter()
        .map(|code| {
            structure(
                &format!("http://hl7.org/fhir/StructureDefinition/{}", code),
                code,
                "primitive-type",
                code,
                "specialization",
                vec![element(code, 0, "*", &[])],
            )
        })
        .collect();

    resources.push(structure(
        "http://hl7.org/fhir/StructureDefinition/HumanName",
        "HumanName",
        "complex-type",
        "HumanName",
        "specialization",
        vec![
            element("HumanName", 0, "*", &[]),
            element("HumanName.family", 0, "1", &["string"]),
            element("HumanName.given", 0, "*", &["string"]),
        ],
    ));
    resources.push(structure(
        "http://hl7.org/fhir/StructureDefinition/Patient",
        "Patient",
        "resource",
        "Patient",
        "specialization",
        patient_elements(0),
    ));
    resources.push(json!({
        "resourceType": "ValueSet",
        "url": "http://hl7.org/fhir/ValueSet/administrative-gender",
        "compose": {"include": [{"system": "http://hl7.org/fhir/administrative-gender"}]}
    }));
    resources.push(json!({
        "resourceType": "CodeSystem",
        "url": "http://hl7.org/fhir/administrative-gender",
        "content": "complete",
        "concept": [
            {"code": "male"}, {"code": "female"}, {"code": "other"}, {"code": "unknown"}
        ]
    }));
    resources
}

/// Conformance resources standing in for the implementation guide package.
pub fn guide_resources() -> Vec<Value> {
    vec![structure(
        "http://hl7.org/fhir/us/core/StructureDefinition/us-core-patient",
        "us-core-patient",
        "resource",
        "Patient",
        "constraint",
        patient_elements(1),
    )]
}

/// Conformance resources standing in for a package the implementation guide
/// depends on: a Patient profile requiring `birthDate`.
pub fn dependency_resources() -> Vec<Value> {
    let mut elements = patient_elements(0);
    for element in &mut elements {
        if element["path"] == "Patient.birthDate" {
            element["min"] = json!(1);
        }
    }
    vec![structure(
        "http://hl7.org/fhir/StructureDefinition/dated-patient",
        "dated-patient",
        "resource",
        "Patient",
        "constraint",
        elements,
    )]
}

/// Builds an npm-style package tarball (`package/package.json` plus one file
/// per resource). `dependencies` become the manifest's `dependencies` map.
pub fn package_tgz(
    name: &str,
    version: &str,
    dependencies: &[(&str, &str)],
    resources: &[Value],
) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

    let mut append = |path: String, content: Vec<u8>| {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_slice())
            .expect("append tar entry");
    };

    let dependencies: serde_json::Map<String, Value> = dependencies
        .iter()
        .map(|(name, version)| (name.to_string(), json!(version)))
        .collect();
    let manifest = json!({"name": name, "version": version, "dependencies": dependencies});
    append("package/package.json".to_string(), manifest.to_string().into_bytes());
    for (index, resource) in resources.iter().enumerate() {
        append(
            format!("package/resource-{}.json", index),
            resource.to_string().into_bytes(),
        );
    }

    let mut encoder = builder.into_inner().expect("finish tar");
    encoder.flush().expect("flush gzip");
    encoder.finish().expect("finish gzip")
}
