//! Batch Bundle processing (each entry independent)

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use graphir_core::{IssueType, OperationOutcome};

use super::{error_entry, execute_entry, is_supported_method, status_line, BundleEntry, RefTable};
use crate::AppState;

/// Process a batch Bundle. Entries are independent: a failing entry is
/// reported inline and the rest still run. The overall response is 200.
pub(super) async fn process_batch(state: &Arc<AppState>, entries: Vec<BundleEntry>) -> Response {
    let mut ref_table = RefTable::new();
    let mut response_entries: Vec<Value> = Vec::with_capacity(entries.len());

    for (i, entry) in entries.iter().enumerate() {
        if !is_supported_method(&entry.method) {
            response_entries.push(error_entry(
                "405 Method Not Allowed",
                OperationOutcome::error(
                    IssueType::NotSupported,
                    format!("entry[{}].request.method '{}' is not supported", i, entry.method),
                ),
            ));
            continue;
        }

        match execute_entry(state, entry, &mut ref_table).await {
            Ok(response) => response_entries.push(response),
            Err(err) => {
                response_entries.push(error_entry(&status_line(&err), err.to_outcome()));
            }
        }
    }

    if !ref_table.is_empty() {
        tracing::debug!(assignments = ?ref_table, "bundle fullUrl assignments");
    }

    let response_bundle = json!({
        "resourceType": "Bundle",
        "type": "batch-response",
        "entry": response_entries
    });
    (StatusCode::OK, Json(response_bundle)).into_response()
}
