use serde::{Deserialize, Serialize};

/// FHIR OperationOutcome resource for error reporting
/// See: https://www.hl7.org/fhir/operationoutcome.html
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub issue: Vec<OperationOutcomeIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcomeIssue {
    pub severity: IssueSeverity,
    pub code: IssueType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Fatal,
    Error,
    Warning,
    Information,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
    Invalid,
    Structure,
    Required,
    Value,
    Processing,
    NotSupported,
    Duplicate,
    MultipleMatches,
    NotFound,
    Deleted,
    Conflict,
    Exception,
    Informational,
}

impl OperationOutcome {
    /// Create a new OperationOutcome with a single issue
    pub fn new(severity: IssueSeverity, code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self {
            resource_type: "OperationOutcome".to_string(),
            id: None,
            issue: vec![OperationOutcomeIssue {
                severity,
                code,
                diagnostics: Some(diagnostics.into()),
                expression: None,
            }],
        }
    }

    /// Informational outcome (validation passed, operation applied)
    pub fn success(diagnostics: impl Into<String>) -> Self {
        Self::new(
            IssueSeverity::Information,
            IssueType::Informational,
            diagnostics,
        )
    }

    /// Create an error OperationOutcome
    pub fn error(code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Error, code, diagnostics)
    }

    pub fn not_found(resource_type: &str, id: &str) -> Self {
        Self::error(
            IssueType::NotFound,
            format!("Resource not found: {}/{}", resource_type, id),
        )
    }

    pub fn invalid(diagnostics: impl Into<String>) -> Self {
        Self::error(IssueType::Invalid, diagnostics)
    }

    pub fn backend_error(diagnostics: impl Into<String>) -> Self {
        Self::error(IssueType::Exception, diagnostics)
    }

    /// Add an issue with expression (path to the problematic element)
    pub fn with_expression(mut self, expression: Vec<String>) -> Self {
        if let Some(issue) = self.issue.last_mut() {
            issue.expression = Some(expression);
        }
        self
    }
}
