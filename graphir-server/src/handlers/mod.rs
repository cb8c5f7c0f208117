pub mod conditional;
pub mod crud;
pub mod everything;
pub mod graph;
pub mod history;
pub mod metadata;
pub mod search;
pub mod validate;

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};

use graphir_core::{GraphirError, OperationOutcome};

use crate::versioning::StoredVersion;

pub const FHIR_JSON: &str = "application/fhir+json; charset=utf-8";

/// Result shape for the internal graph endpoints.
pub struct OperationResult {
    pub success: bool,
    pub status: StatusCode,
    pub body: Option<Value>,
}

impl OperationResult {
    pub fn ok(status: StatusCode, body: Value) -> Self {
        Self {
            success: true,
            status,
            body: Some(body),
        }
    }

    pub fn no_content() -> Self {
        Self {
            success: true,
            status: StatusCode::NO_CONTENT,
            body: None,
        }
    }
}

impl IntoResponse for OperationResult {
    fn into_response(self) -> Response {
        match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => self.status.into_response(),
        }
    }
}

/// Result shape for the FHIR endpoints: status, body, and the Location /
/// ETag / Last-Modified headers the interaction calls for.
pub struct FhirOperationResult {
    pub success: bool,
    pub status: StatusCode,
    pub body: Option<Value>,
    pub location: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl FhirOperationResult {
    pub fn new(status: StatusCode, body: Option<Value>) -> Self {
        Self {
            success: status.is_success() || status == StatusCode::NOT_MODIFIED,
            status,
            body,
            location: None,
            etag: None,
            last_modified: None,
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(StatusCode::OK, Some(body))
    }

    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT, None)
    }

    pub fn not_modified() -> Self {
        Self::new(StatusCode::NOT_MODIFIED, None)
    }

    /// Attach ETag and Last-Modified from a stored version.
    pub fn with_version(mut self, stored: &StoredVersion) -> Self {
        self.etag = Some(weak_etag(&stored.version_id));
        self.last_modified = stored.last_updated.as_deref().and_then(rfc1123);
        self
    }

    pub fn with_location(mut self, location: String) -> Self {
        self.location = Some(location);
        self
    }
}

impl IntoResponse for FhirOperationResult {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        if let Some(etag) = self.etag.as_deref().and_then(|v| v.parse().ok()) {
            headers.insert(header::ETAG, etag);
        }
        if let Some(lm) = self.last_modified.as_deref().and_then(|v| v.parse().ok()) {
            headers.insert(header::LAST_MODIFIED, lm);
        }
        if let Some(location) = self.location.as_deref().and_then(|v| v.parse().ok()) {
            headers.insert(header::LOCATION, location);
        }
        match self.body {
            Some(body) => {
                headers.insert(header::CONTENT_TYPE, FHIR_JSON.parse().expect("static header"));
                (self.status, headers, Json(body)).into_response()
            }
            None => (self.status, headers).into_response(),
        }
    }
}

/// Error carrier for handlers: a status code plus an OperationOutcome body.
pub struct ApiError {
    pub status: StatusCode,
    pub outcome: Value,
}

impl ApiError {
    pub fn new(status: StatusCode, outcome: OperationOutcome) -> Self {
        Self {
            status,
            outcome: json!(outcome),
        }
    }
}

impl From<GraphirError> for ApiError {
    fn from(err: GraphirError) -> Self {
        Self {
            status: status_for(&err),
            outcome: json!(err.to_outcome()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.outcome)).into_response()
    }
}

/// Map error kinds to the HTTP status contract.
pub fn status_for(err: &GraphirError) -> StatusCode {
    match err {
        GraphirError::NotFound { .. } | GraphirError::VersionNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        GraphirError::Gone { .. } => StatusCode::GONE,
        GraphirError::Validation(_) => StatusCode::BAD_REQUEST,
        GraphirError::Precondition(_) | GraphirError::MultipleMatches(_) => {
            StatusCode::PRECONDITION_FAILED
        }
        GraphirError::Conflict(_) => StatusCode::CONFLICT,
        GraphirError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        GraphirError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        GraphirError::Backend(_) | GraphirError::InvalidJson(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn weak_etag(token: &str) -> String {
    format!("W/\"{}\"", token)
}

/// Strip `W/"..."` / `"..."` quoting from a conditional request header.
pub fn etag_token(header_value: &str) -> String {
    header_value
        .trim()
        .trim_start_matches("W/")
        .trim_matches('"')
        .to_string()
}

/// RFC 1123 instant for the Last-Modified header.
pub fn rfc1123(rfc3339: &str) -> Option<String> {
    chrono::DateTime::parse_from_rfc3339(rfc3339)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc).format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

/// Parse a `_count`-style query value.
pub fn parse_count(raw: Option<&String>) -> Option<usize> {
    raw.and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weak_etag_round_trip() {
        let etag = weak_etag("3");
        assert_eq!(etag, "W/\"3\"");
        assert_eq!(etag_token(&etag), "3");
        assert_eq!(etag_token("\"3\""), "3");
    }

    #[test]
    fn test_rfc1123() {
        let formatted = rfc1123("2026-02-03T04:05:06.123456Z").unwrap();
        assert_eq!(formatted, "Tue, 03 Feb 2026 04:05:06 GMT");
        assert!(rfc1123("not-a-date").is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&GraphirError::not_found("Patient", "x")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&GraphirError::MultipleMatches("x".into())),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            status_for(&GraphirError::Unprocessable("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&GraphirError::Gone {
                resource_type: "Patient".into(),
                id: "x".into(),
                version_id: "1".into()
            }),
            StatusCode::GONE
        );
    }
}
