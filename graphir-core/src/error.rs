use thiserror::Error;

use crate::operation_outcome::{IssueType, OperationOutcome};

#[derive(Error, Debug)]
pub enum GraphirError {
    #[error("Resource not found: {resource_type}/{id}")]
    NotFound { resource_type: String, id: String },

    #[error("Version not found: {resource_type}/{id}/_history/{version_id}")]
    VersionNotFound {
        resource_type: String,
        id: String,
        version_id: String,
    },

    #[error("Resource deleted: {resource_type}/{id} version {version_id}")]
    Gone {
        resource_type: String,
        id: String,
        version_id: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Multiple matches: {0}")]
    MultipleMatches(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Graph backend error: {0}")]
    Backend(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl GraphirError {
    /// Build the OperationOutcome a client sees for this error.
    pub fn to_outcome(&self) -> OperationOutcome {
        let code = match self {
            GraphirError::NotFound { .. } | GraphirError::VersionNotFound { .. } => {
                IssueType::NotFound
            }
            GraphirError::Gone { .. } => IssueType::Deleted,
            GraphirError::Validation(_) | GraphirError::InvalidJson(_) => IssueType::Invalid,
            GraphirError::Precondition(_) | GraphirError::Conflict(_) => IssueType::Conflict,
            GraphirError::MultipleMatches(_) => IssueType::MultipleMatches,
            GraphirError::Unprocessable(_) => IssueType::Processing,
            GraphirError::NotImplemented(_) => IssueType::NotSupported,
            GraphirError::Backend(_) => IssueType::Exception,
        };
        OperationOutcome::error(code, self.to_string())
    }

    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        GraphirError::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GraphirError>;
