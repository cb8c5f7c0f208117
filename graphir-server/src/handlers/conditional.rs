use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::Value;
use std::sync::Arc;

use super::{ApiError, FhirOperationResult};
use crate::conditional;
use crate::handlers::search::SearchParams;
use crate::AppState;

fn criteria_from(params: &SearchParams) -> Result<Vec<(String, String)>, ApiError> {
    let query: String = params
        .params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    Ok(conditional::parse_criteria(&query)?)
}

/// Conditional update (PUT /{resource_type}?params)
///
/// - 0 matches → create (201), using the body's id
/// - 1 match → update that resource (200)
/// - multiple matches → 412 Precondition Failed
pub async fn conditional_update(
    State(state): State<Arc<AppState>>,
    Path(resource_type): Path<String>,
    Query(params): Query<SearchParams>,
    Json(body): Json<Value>,
) -> Result<FhirOperationResult, ApiError> {
    let criteria = criteria_from(&params)?;
    let versioned = state.versioned();
    let stored = conditional::conditional_update(
        state.graph.as_ref(),
        &versioned,
        &resource_type,
        &criteria,
        body,
    )
    .await?;

    let location = format!(
        "{}/{}/{}",
        state.fhir_base_url(),
        resource_type,
        stored.fhir_id
    );
    let status = if stored.created {
        axum::http::StatusCode::CREATED
    } else {
        axum::http::StatusCode::OK
    };
    Ok(FhirOperationResult::new(status, Some(stored.resource.clone()))
        .with_version(&stored)
        .with_location(location))
}

/// Conditional delete (DELETE /{resource_type}?params)
///
/// - 0 matches → 404 Not Found, nothing deleted
/// - 1 match → tombstone + 204 No Content
/// - multiple matches → 412 Precondition Failed
pub async fn conditional_delete(
    State(state): State<Arc<AppState>>,
    Path(resource_type): Path<String>,
    Query(params): Query<SearchParams>,
) -> Result<FhirOperationResult, ApiError> {
    let criteria = criteria_from(&params)?;
    let versioned = state.versioned();
    let deleted = conditional::conditional_delete(
        state.graph.as_ref(),
        &versioned,
        &resource_type,
        &criteria,
        false,
    )
    .await?;

    if deleted == 0 {
        return Err(ApiError::new(
            axum::http::StatusCode::NOT_FOUND,
            graphir_core::OperationOutcome::error(
                graphir_core::IssueType::NotFound,
                format!("No {} matched the conditional delete criteria", resource_type),
            ),
        ));
    }
    Ok(FhirOperationResult::no_content())
}

/// Conditional patch (PATCH /{resource_type}?params)
///
/// - 0 matches → 404 Not Found
/// - 1 match → patch that resource (200)
/// - multiple matches → 412 Precondition Failed
pub async fn conditional_patch(
    State(state): State<Arc<AppState>>,
    Path(resource_type): Path<String>,
    Query(params): Query<SearchParams>,
    Json(patch_body): Json<Value>,
) -> Result<FhirOperationResult, ApiError> {
    let criteria = criteria_from(&params)?;
    let versioned = state.versioned();
    let stored = conditional::conditional_patch(
        state.graph.as_ref(),
        &versioned,
        &resource_type,
        &criteria,
        &patch_body,
    )
    .await?;
    Ok(FhirOperationResult::ok(stored.resource.clone()).with_version(&stored))
}
