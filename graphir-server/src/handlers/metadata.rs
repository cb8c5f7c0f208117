use axum::{
    extract::State,
    response::{IntoResponse, Json},
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::AppState;

/// Health check (GET /health)
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "fhirVersion": state.config.fhir.fhir_version,
        "schemaLoaded": state.validator.is_loaded(),
    }))
}

/// CapabilityStatement (GET /metadata), assembled from the schema's
/// supported resource types.
pub async fn capability_statement(State(state): State<Arc<AppState>>) -> Json<Value> {
    let interactions = [
        "read",
        "vread",
        "update",
        "patch",
        "delete",
        "history-instance",
        "history-type",
        "create",
        "search-type",
    ];
    let interactions: Vec<Value> = interactions.iter().map(|code| json!({"code": code})).collect();

    let search_params = json!([
        {"name": "_id", "type": "token"},
        {"name": "identifier", "type": "token"}
    ]);

    let resources: Vec<Value> = state
        .validator
        .supported_types()
        .iter()
        .map(|resource_type| {
            json!({
                "type": resource_type,
                "versioning": "versioned",
                "readHistory": true,
                "conditionalCreate": true,
                "conditionalUpdate": true,
                "conditionalPatch": true,
                "conditionalDelete": "single",
                "interaction": interactions,
                "searchParam": search_params,
            })
        })
        .collect();

    Json(json!({
        "resourceType": "CapabilityStatement",
        "status": "active",
        "kind": "instance",
        "fhirVersion": state.config.fhir.fhir_version,
        "format": ["application/fhir+json", "application/json"],
        "patchFormat": ["application/json-patch+json"],
        "software": {
            "name": "graphir",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "implementation": {
            "description": "graphir - FHIR R6 server on a property graph",
            "url": state.fhir_base_url(),
        },
        "rest": [{
            "mode": "server",
            "resource": resources,
            "interaction": [
                {"code": "transaction"},
                {"code": "batch"},
                {"code": "search-system"},
                {"code": "history-system"},
            ],
            "operation": [
                {"name": "validate", "definition": "http://hl7.org/fhir/OperationDefinition/Resource-validate"},
            ]
        }]
    }))
}
