use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde_json::Value;
use std::sync::Arc;

use graphir_core::{GraphirError, IssueType, OperationOutcome};
use graphir_store::prop;

use super::{etag_token, ApiError, FhirOperationResult};
use crate::conditional::{self, ConditionalMatch};
use crate::versioning::StoredVersion;
use crate::AppState;

fn resource_location(state: &AppState, resource_type: &str, id: &str) -> String {
    format!("{}/{}/{}", state.fhir_base_url(), resource_type, id)
}

/// Create resource (POST /{resource_type})
pub async fn create(
    State(state): State<Arc<AppState>>,
    Path(resource_type): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<FhirOperationResult, ApiError> {
    // Conditional create: If-None-Exist header
    if let Some(query) = headers.get("If-None-Exist").and_then(|v| v.to_str().ok()) {
        let criteria = conditional::parse_criteria(query)?;
        if criteria.is_empty() {
            return Err(GraphirError::Validation(
                "If-None-Exist requires search parameters".to_string(),
            )
            .into());
        }
        match conditional::probe(state.graph.as_ref(), &resource_type, &criteria, false).await? {
            ConditionalMatch::None => { /* proceed */ }
            ConditionalMatch::One(existing) => {
                let id = existing.prop_str(prop::ID).unwrap_or_default().to_string();
                let stored = state.versioned().read_current(&resource_type, &id).await?;
                return Ok(FhirOperationResult::ok(stored.resource.clone())
                    .with_version(&stored)
                    .with_location(resource_location(&state, &resource_type, &id)));
            }
            ConditionalMatch::Multiple(_) => {
                return Err(ApiError::new(
                    StatusCode::PRECONDITION_FAILED,
                    OperationOutcome::error(
                        IssueType::Duplicate,
                        format!("Multiple matches for If-None-Exist: {}", query),
                    ),
                ));
            }
        }
    }

    let stored = state.versioned().create(&resource_type, body).await?;
    Ok(created_response(&state, stored))
}

fn created_response(state: &AppState, stored: StoredVersion) -> FhirOperationResult {
    let location = resource_location(state, &stored.resource_type, &stored.fhir_id);
    FhirOperationResult::new(StatusCode::CREATED, Some(stored.resource.clone()))
        .with_version(&stored)
        .with_location(location)
}

/// Read resource (GET /{resource_type}/{id})
pub async fn read(
    State(state): State<Arc<AppState>>,
    Path((resource_type, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<FhirOperationResult, ApiError> {
    let stored = state.versioned().read_current(&resource_type, &id).await?;

    // Conditional read: a matching If-None-Match short-circuits to 304
    if let Some(candidate) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        if etag_token(candidate) == stored.version_id {
            return Ok(FhirOperationResult::not_modified().with_version(&stored));
        }
    }

    Ok(FhirOperationResult::ok(stored.resource.clone()).with_version(&stored))
}

/// Check If-Match against the current version. A resource that does not
/// exist yet has nothing to fail the precondition against, so the
/// operation proceeds.
async fn check_if_match(
    state: &AppState,
    headers: &HeaderMap,
    resource_type: &str,
    id: &str,
) -> Result<(), ApiError> {
    let expected = match headers.get(header::IF_MATCH).and_then(|v| v.to_str().ok()) {
        Some(v) => etag_token(v),
        None => return Ok(()),
    };
    let current = match state.versioned().read_current(resource_type, id).await {
        Ok(stored) => stored,
        Err(GraphirError::NotFound { .. }) => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if expected != current.version_id {
        return Err(GraphirError::Precondition(format!(
            "If-Match version {} does not match current version {}",
            expected, current.version_id
        ))
        .into());
    }
    Ok(())
}

/// Update resource (PUT /{resource_type}/{id})
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path((resource_type, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<FhirOperationResult, ApiError> {
    check_if_match(&state, &headers, &resource_type, &id).await?;

    let stored = state.versioned().write(&resource_type, &id, body).await?;
    if stored.created {
        Ok(created_response(&state, stored))
    } else {
        let location = resource_location(&state, &resource_type, &id);
        Ok(FhirOperationResult::ok(stored.resource.clone())
            .with_version(&stored)
            .with_location(location))
    }
}

/// JSON Patch (PATCH /{resource_type}/{id})
pub async fn patch_resource(
    State(state): State<Arc<AppState>>,
    Path((resource_type, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(patch_body): Json<Value>,
) -> Result<FhirOperationResult, ApiError> {
    check_if_match(&state, &headers, &resource_type, &id).await?;

    let stored = state
        .versioned()
        .patch(&resource_type, &id, &patch_body)
        .await?;
    Ok(FhirOperationResult::ok(stored.resource.clone()).with_version(&stored))
}

/// Delete resource (DELETE /{resource_type}/{id}) — appends a tombstone
/// version; history stays readable.
pub async fn delete_resource(
    State(state): State<Arc<AppState>>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Result<FhirOperationResult, ApiError> {
    state.versioned().tombstone(&resource_type, &id).await?;
    Ok(FhirOperationResult::no_content())
}
