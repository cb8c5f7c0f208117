use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

use graphir_core::{inject_meta, IssueType, OperationOutcome};
use graphir_store::{prop, Vertex};

use super::{parse_count, ApiError};
use crate::handlers::search::SearchParams;
use crate::persist::backend;
use crate::AppState;

const EVERYTHING_MAX_HOPS: u32 = 3;
const DEFAULT_LIMIT: usize = 500;

/// Patient $everything (GET /Patient/{id}/$everything)
///
/// Walks the reference graph out from the patient's current version and
/// returns a searchset Bundle with the patient first and every reachable,
/// non-placeholder resource once.
pub async fn patient_everything(
    State(state): State<Arc<AppState>>,
    Path((resource_type, patient_id)): Path<(String, String)>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ApiError> {
    if resource_type != "Patient" {
        return Err(ApiError::new(
            axum::http::StatusCode::BAD_REQUEST,
            OperationOutcome::error(
                IssueType::NotSupported,
                format!(
                    "$everything is only supported for Patient, not {}",
                    resource_type
                ),
            ),
        ));
    }

    let patient = state.versioned().read_current("Patient", &patient_id).await?;
    let limit = parse_count(params.params.get("_count")).unwrap_or(DEFAULT_LIMIT);

    let reachable = state
        .graph
        .traverse(patient.graph_id, EVERYTHING_MAX_HOPS, None, Some(limit))
        .await
        .map_err(backend)?;

    let mut seen: HashSet<(String, String)> = HashSet::new();
    seen.insert(("Patient".to_string(), patient_id.clone()));

    let mut entries = vec![json!({
        "fullUrl": format!("Patient/{}", patient_id),
        "resource": patient.resource,
        "search": {"mode": "match"}
    })];

    for vertex in &reachable {
        if let Some(entry) = compartment_entry(vertex, &mut seen) {
            entries.push(entry);
        }
    }

    let total = entries.len();
    Ok(Json(json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": total,
        "link": [{
            "relation": "self",
            "url": format!("{}/Patient/{}/$everything", state.fhir_base_url(), patient_id)
        }],
        "entry": entries
    })))
}

/// Turn a reachable vertex into a bundle entry, skipping placeholders,
/// tombstones, superseded versions, and duplicates.
fn compartment_entry(vertex: &Vertex, seen: &mut HashSet<(String, String)>) -> Option<Value> {
    if vertex.prop_bool(prop::IS_PLACEHOLDER) || vertex.prop_bool(prop::IS_DELETED) {
        return None;
    }
    // a vertex that carries the flag and has it false is an old version
    if let Some(current) = vertex.properties.get(prop::IS_CURRENT) {
        if current.as_bool() == Some(false) {
            return None;
        }
    }
    let json_text = vertex.prop_str(prop::JSON)?;
    let fhir_id = vertex.prop_str(prop::ID)?.to_string();
    if !seen.insert((vertex.label.clone(), fhir_id.clone())) {
        return None;
    }

    let mut resource: Value = serde_json::from_str(json_text).ok()?;
    inject_meta(
        &mut resource,
        vertex.prop_str(prop::VERSION_ID),
        vertex.prop_str(prop::LAST_UPDATED),
    );
    Some(json!({
        "fullUrl": format!("{}/{}", vertex.label, fhir_id),
        "resource": resource,
        "search": {"mode": "match"}
    }))
}
