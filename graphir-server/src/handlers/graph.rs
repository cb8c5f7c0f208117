//! The non-versioned graph surface: direct vertex-level persistence,
//! reference introspection, and maintenance endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use graphir_core::{GraphirError, OperationOutcome};
use graphir_store::{edge, prop, Direction};

use super::{ApiError, OperationResult};
use crate::persist::backend;
use crate::AppState;

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
pub struct PersistParams {
    #[serde(rename = "materializeReferences", default = "default_true")]
    pub materialize_references: bool,
    #[serde(rename = "allowPlaceholders", default = "default_true")]
    pub allow_placeholders: bool,
}

/// Create or replace a resource vertex (POST /graph).
pub async fn create_resource(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PersistParams>,
    Json(body): Json<Value>,
) -> Result<OperationResult, ApiError> {
    let outcome = state
        .persistence()
        .validate_and_persist(&body, params.materialize_references, params.allow_placeholders)
        .await?;

    Ok(OperationResult::ok(
        StatusCode::CREATED,
        json!({
            "graphId": outcome.graph_id,
            "resourceType": outcome.resource_type,
            "fhirId": outcome.fhir_id,
            "materializedReferences": outcome.materialized,
        }),
    ))
}

/// Raw stored JSON (GET /graph/{resource_type}/{id}).
pub async fn read_resource(
    State(state): State<Arc<AppState>>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Result<OperationResult, ApiError> {
    let stored = state
        .persistence()
        .get(&resource_type, &id)
        .await?
        .ok_or_else(|| GraphirError::not_found(&resource_type, &id))?;
    let body: Value = serde_json::from_str(&stored).map_err(GraphirError::from)?;
    Ok(OperationResult::ok(StatusCode::OK, body))
}

/// Hard delete (DELETE /graph/{resource_type}/{id}): the vertex and its
/// incident edges are dropped outright.
pub async fn delete_resource(
    State(state): State<Arc<AppState>>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Result<OperationResult, ApiError> {
    if state.persistence().delete(&resource_type, &id).await? {
        Ok(OperationResult::no_content())
    } else {
        Err(ApiError::new(
            StatusCode::NOT_FOUND,
            OperationOutcome::not_found(&resource_type, &id),
        ))
    }
}

/// Outgoing materialized references of a resource
/// (GET /graph/{resource_type}/{id}/references).
pub async fn references(
    State(state): State<Arc<AppState>>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let vertex = state
        .persistence()
        .find_vertex(&resource_type, &id)
        .await?
        .ok_or_else(|| GraphirError::not_found(&resource_type, &id))?;

    let edges = state
        .graph
        .edges_for_vertex(vertex.id)
        .await
        .map_err(backend)?;

    let references: Vec<Value> = edges
        .iter()
        .filter(|e| e.direction == Direction::Out && e.label.starts_with(edge::REF_PREFIX))
        .map(|e| {
            json!({
                "path": e.properties.get(prop::PATH),
                "targetResourceType": e.properties.get(prop::TARGET_TYPE),
                "targetFhirId": e.properties.get(prop::TARGET_ID),
            })
        })
        .collect();

    Ok(Json(json!(references)))
}

/// Vertex count (GET /graph/count).
pub async fn count(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let vertices = state.graph.count_vertices().await.map_err(backend)?;
    Ok(Json(json!({"vertices": vertices})))
}

/// Drop the whole graph (DELETE /graph).
pub async fn wipe(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let dropped = state.graph.drop_all().await.map_err(backend)?;
    tracing::warn!(dropped, "graph wiped");
    Ok(Json(json!({"dropped": dropped})))
}
