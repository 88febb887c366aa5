//! OperationOutcome model.
//!
//! The validation engine reports its findings as a FHIR
//! [OperationOutcome](https://hl7.org/fhir/R4/operationoutcome.html). This
//! module holds the serde model of that resource, a builder used while
//! collecting issues, and the [`SeverityTally`] used for request logging.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Issue severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Fatal error - processing cannot continue.
    Fatal,
    /// Error - the content is not valid.
    Error,
    /// Warning - the content is valid but questionable.
    Warning,
    /// Information - informational message.
    Information,
}

impl IssueSeverity {
    /// Returns the FHIR string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::Fatal => "fatal",
            IssueSeverity::Error => "error",
            IssueSeverity::Warning => "warning",
            IssueSeverity::Information => "information",
        }
    }

    /// Returns true for `fatal` and `error`.
    pub fn is_error(&self) -> bool {
        matches!(self, IssueSeverity::Fatal | IssueSeverity::Error)
    }
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issue type codes from the FHIR `issue-type` value set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
    /// Invalid content.
    Invalid,
    /// Structural issue.
    Structure,
    /// Required element missing.
    Required,
    /// Element value invalid.
    Value,
    /// Code not in the bound value set.
    CodeInvalid,
    /// Not supported.
    NotSupported,
    /// Reference not found.
    NotFound,
    /// Processing error.
    Processing,
    /// Unexpected internal error.
    Exception,
    /// Processing timed out.
    Timeout,
    /// Transient error.
    Transient,
    /// Informational message.
    Informational,
}

impl IssueType {
    /// Returns the FHIR code string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::Invalid => "invalid",
            IssueType::Structure => "structure",
            IssueType::Required => "required",
            IssueType::Value => "value",
            IssueType::CodeInvalid => "code-invalid",
            IssueType::NotSupported => "not-supported",
            IssueType::NotFound => "not-found",
            IssueType::Processing => "processing",
            IssueType::Exception => "exception",
            IssueType::Timeout => "timeout",
            IssueType::Transient => "transient",
            IssueType::Informational => "informational",
        }
    }
}

/// A single coded value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coding {
    /// Code system URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// The code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// Codings plus free text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeableConcept {
    /// Codings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,
    /// Plain text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// An issue in an OperationOutcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// The severity of the issue.
    pub severity: IssueSeverity,
    /// The type/code of the issue.
    pub code: IssueType,
    /// Coded details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<CodeableConcept>,
    /// Engine diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    /// FHIRPath expressions locating the issue.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expression: Vec<String>,
}

impl Issue {
    /// Creates a new issue.
    pub fn new(severity: IssueSeverity, code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            details: None,
            diagnostics: Some(diagnostics.into()),
            expression: Vec::new(),
        }
    }

    /// Creates a fatal issue.
    pub fn fatal(code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Fatal, code, diagnostics)
    }

    /// Creates an error issue.
    pub fn error(code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Error, code, diagnostics)
    }

    /// Creates a warning issue.
    pub fn warning(code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Warning, code, diagnostics)
    }

    /// Creates an information issue.
    pub fn information(code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Information, code, diagnostics)
    }

    /// Sets the expression (location).
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression.push(expression.into());
        self
    }

    /// Sets coded details.
    pub fn with_details(mut self, details: CodeableConcept) -> Self {
        self.details = Some(details);
        self
    }
}

/// The OperationOutcome resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    #[serde(default = "operation_outcome_type")]
    resource_type: String,
    /// Issues in the order the engine reported them.
    #[serde(default)]
    pub issue: Vec<Issue>,
}

fn operation_outcome_type() -> String {
    "OperationOutcome".to_string()
}

impl Default for OperationOutcome {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl OperationOutcome {
    /// Creates an outcome from a list of issues.
    pub fn new(issue: Vec<Issue>) -> Self {
        Self {
            resource_type: operation_outcome_type(),
            issue,
        }
    }

    /// Returns the `resourceType` value.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Returns the issues.
    pub fn issues(&self) -> &[Issue] {
        &self.issue
    }

    /// Counts issues by severity class.
    pub fn tally(&self) -> SeverityTally {
        SeverityTally::from_issues(&self.issue)
    }
}

/// Builder for OperationOutcome resources.
#[derive(Debug, Default)]
pub struct OperationOutcomeBuilder {
    issues: Vec<Issue>,
}

impl OperationOutcomeBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an issue.
    pub fn add_issue(mut self, issue: Issue) -> Self {
        self.issues.push(issue);
        self
    }

    /// Adds an issue in place.
    pub fn push(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    /// Appends issues in place.
    pub fn extend(&mut self, issues: impl IntoIterator<Item = Issue>) {
        self.issues.extend(issues);
    }

    /// Adds an error issue.
    pub fn error(self, code: IssueType, diagnostics: impl Into<String>) -> Self {
        self.add_issue(Issue::error(code, diagnostics))
    }

    /// Adds a warning issue.
    pub fn warning(self, code: IssueType, diagnostics: impl Into<String>) -> Self {
        self.add_issue(Issue::warning(code, diagnostics))
    }

    /// Builds the OperationOutcome resource.
    pub fn build(self) -> OperationOutcome {
        OperationOutcome::new(self.issues)
    }

    /// Returns true if there are any error or fatal issues.
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity.is_error())
    }

    /// Returns true if there are any issues.
    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }
}

/// Issue counts per severity class.
///
/// Every severity maps to exactly one bucket, so `total()` always equals the
/// number of issues the tally was built from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityTally {
    /// `fatal` and `error` issues.
    pub errors: usize,
    /// `warning` issues.
    pub warnings: usize,
    /// `information` issues.
    pub information: usize,
}

impl SeverityTally {
    /// Classifies every issue into one bucket.
    pub fn from_issues(issues: &[Issue]) -> Self {
        issues.iter().fold(Self::default(), |mut tally, issue| {
            match issue.severity {
                IssueSeverity::Fatal | IssueSeverity::Error => tally.errors += 1,
                IssueSeverity::Warning => tally.warnings += 1,
                IssueSeverity::Information => tally.information += 1,
            }
            tally
        })
    }

    /// Total number of issues counted.
    pub fn total(&self) -> usize {
        self.errors + self.warnings + self.information
    }

    /// True when no error or fatal issue was found.
    pub fn is_success(&self) -> bool {
        self.errors == 0
    }
}
