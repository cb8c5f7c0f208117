use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use super::{parse_count, rfc1123, weak_etag, ApiError, FhirOperationResult};
use crate::handlers::search::SearchParams;
use crate::versioning::HistoryVersion;
use crate::AppState;

fn history_bundle(entries: Vec<Value>) -> Value {
    json!({
        "resourceType": "Bundle",
        "type": "history",
        "total": entries.len(),
        "entry": entries
    })
}

fn history_entry(version: &HistoryVersion) -> Value {
    let url = format!("{}/{}", version.resource_type, version.fhir_id);
    let mut entry = json!({
        "fullUrl": url,
        "request": {
            "method": version.method(),
            "url": url
        },
        "response": {
            "status": version.status(),
            "etag": weak_etag(&version.version_id)
        }
    });
    if let Some(lm) = version.last_updated.as_deref().and_then(rfc1123) {
        entry["response"]["lastModified"] = json!(lm);
    }
    // tombstone entries carry no resource
    if let Some(resource) = &version.resource {
        entry["resource"] = resource.clone();
    }
    entry
}

/// Instance history (GET /{resource_type}/{id}/_history), newest first.
pub async fn instance_history(
    State(state): State<Arc<AppState>>,
    Path((resource_type, id)): Path<(String, String)>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ApiError> {
    let limit = parse_count(params.params.get("_count"));
    let versions = state
        .versioned()
        .instance_history(&resource_type, &id, limit)
        .await?;
    let entries = versions.iter().map(history_entry).collect();
    Ok(Json(history_bundle(entries)))
}

/// Type history (GET /{resource_type}/_history)
pub async fn type_history(
    State(state): State<Arc<AppState>>,
    Path(resource_type): Path<String>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ApiError> {
    let limit = parse_count(params.params.get("_count"));
    let since = params.params.get("_since").map(|s| s.as_str());
    let versions = state
        .versioned()
        .type_history(&resource_type, limit, since)
        .await?;
    let entries = versions.iter().map(history_entry).collect();
    Ok(Json(history_bundle(entries)))
}

/// System history (GET /_history) across every supported type.
pub async fn system_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ApiError> {
    let limit = parse_count(params.params.get("_count"));
    let since = params.params.get("_since").map(|s| s.as_str());
    let versions = state.versioned().system_history(limit, since).await?;
    let entries = versions.iter().map(history_entry).collect();
    Ok(Json(history_bundle(entries)))
}

/// Read specific version (GET /{resource_type}/{id}/_history/{vid})
pub async fn vread(
    State(state): State<Arc<AppState>>,
    Path((resource_type, id, vid)): Path<(String, String, String)>,
) -> Result<FhirOperationResult, ApiError> {
    let stored = state.versioned().vread(&resource_type, &id, &vid).await?;
    Ok(FhirOperationResult::ok(stored.resource.clone()).with_version(&stored))
}
