//! Transaction Bundle processing (all-or-nothing up to backend limits)
//!
//! Entries are validated up front and executed in FHIR transaction order:
//! DELETE, then POST, then PUT/PATCH, then GET. The first failure aborts
//! the bundle with a single OperationOutcome. The graph backend offers no
//! cross-entry rollback, so a backend failure after earlier entries have
//! written surfaces as 500 with those writes retained.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use graphir_core::{GraphirError, IssueType, OperationOutcome};

use super::{execute_entry, is_supported_method, BundleEntry, RefTable};
use crate::AppState;

fn abort(status: StatusCode, outcome: OperationOutcome) -> Response {
    (status, Json(json!(outcome))).into_response()
}

/// Execution rank within a transaction.
fn method_rank(method: &str) -> u8 {
    match method {
        "DELETE" => 0,
        "POST" => 1,
        "PUT" | "PATCH" => 2,
        _ => 3, // GET
    }
}

pub(super) async fn process_transaction(
    state: &Arc<AppState>,
    entries: Vec<BundleEntry>,
) -> Response {
    // Phase 1: validate every entry before touching the graph.
    for (i, entry) in entries.iter().enumerate() {
        if !is_supported_method(&entry.method) {
            return abort(
                StatusCode::BAD_REQUEST,
                OperationOutcome::error(
                    IssueType::NotSupported,
                    format!("entry[{}].request.method '{}' is not supported", i, entry.method),
                ),
            );
        }
        match entry.method.as_str() {
            "POST" | "PUT" | "PATCH" => {
                let resource = match &entry.resource {
                    Some(resource) => resource,
                    None => {
                        return abort(
                            StatusCode::BAD_REQUEST,
                            OperationOutcome::error(
                                IssueType::Required,
                                format!(
                                    "entry[{}].resource is required for {}",
                                    i, entry.method
                                ),
                            ),
                        );
                    }
                };
                // A PATCH body is a patch document, not a resource.
                if entry.method != "PATCH" {
                    if let Err(message) = state.validator.validate(resource) {
                        return abort(
                            StatusCode::BAD_REQUEST,
                            OperationOutcome::invalid(format!("entry[{}]: {}", i, message)),
                        );
                    }
                }
            }
            "GET" => {
                if entry.query.is_some() || entry.id.is_none() {
                    return abort(
                        StatusCode::BAD_REQUEST,
                        OperationOutcome::error(
                            IssueType::NotSupported,
                            format!("entry[{}]: search within a transaction is not supported", i),
                        ),
                    );
                }
            }
            _ => {}
        }
        if matches!(entry.method.as_str(), "PUT" | "PATCH" | "DELETE") && entry.id.is_none() {
            return abort(
                StatusCode::BAD_REQUEST,
                OperationOutcome::error(
                    IssueType::Required,
                    format!(
                        "entry[{}].request.url must include resource id for {}",
                        i, entry.method
                    ),
                ),
            );
        }
    }

    // Phase 2: order execution DELETE -> POST -> PUT/PATCH -> GET,
    // keeping responses in request order.
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by_key(|&i| method_rank(&entries[i].method));

    // Phase 3: execute; the first failure fails the whole bundle.
    let mut ref_table = RefTable::new();
    let mut responses: Vec<Option<Value>> = vec![None; entries.len()];

    for &i in &order {
        match execute_entry(state, &entries[i], &mut ref_table).await {
            Ok(response) => responses[i] = Some(response),
            Err(err) => {
                let status = match err {
                    GraphirError::Backend(_) | GraphirError::InvalidJson(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                    _ => StatusCode::BAD_REQUEST,
                };
                tracing::warn!(
                    entry = i,
                    error = %err,
                    http = status.as_u16(),
                    "transaction aborted"
                );
                return abort(status, err.to_outcome());
            }
        }
    }

    if !ref_table.is_empty() {
        tracing::debug!(assignments = ?ref_table, "bundle fullUrl assignments");
    }

    let response_bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction-response",
        "entry": responses.into_iter().flatten().collect::<Vec<Value>>()
    });
    (StatusCode::OK, Json(response_bundle)).into_response()
}
