//! HTTP response assertions.

use axum_test::TestResponse;
use helios_validation::error::ERROR_SYSTEM;
use serde_json::Value;

/// Asserts that the response has the expected status code.
pub fn assert_status(response: &TestResponse, expected: u16) {
    let actual = response.status_code().as_u16();
    assert_eq!(
        actual, expected,
        "Expected status {}, got {}",
        expected, actual
    );
}

/// Asserts that the response is an OperationOutcome served as `application/json`.
pub fn assert_outcome(response: &TestResponse) -> Value {
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(
        content_type.starts_with("application/json"),
        "Expected application/json, got {}",
        content_type
    );

    let body: Value = response.json();
    assert_eq!(body["resourceType"], "OperationOutcome");
    body
}

/// Asserts an error response: the status, a single fatal issue and the error
/// indicator code.
pub fn assert_error_outcome(response: &TestResponse, status: u16, kind: &str) -> Value {
    assert_status(response, status);
    let body = assert_outcome(response);

    let issues = body["issue"].as_array().expect("issue array");
    assert_eq!(issues.len(), 1, "Expected a single issue: {}", body);
    assert_eq!(issues[0]["severity"], "fatal");
    assert_eq!(issues[0]["details"]["coding"][0]["system"], ERROR_SYSTEM);
    assert_eq!(issues[0]["details"]["coding"][0]["code"], kind);
    body
}

/// Diagnostics of every issue, in order.
pub fn diagnostics(body: &Value) -> Vec<String> {
    body["issue"]
        .as_array()
        .map(|issues| {
            issues
                .iter()
                .filter_map(|i| i["diagnostics"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
