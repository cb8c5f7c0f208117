pub mod error;
pub mod operation_outcome;
pub mod patch;
pub mod reference;
pub mod resource;
pub mod schema;

pub use error::{GraphirError, Result};
pub use operation_outcome::{
    IssueSeverity, IssueType, OperationOutcome, OperationOutcomeIssue,
};
pub use reference::{extract_references, ResourceReference};
pub use resource::{identifier_values, inject_meta, Meta, Resource};
pub use schema::SchemaValidator;
