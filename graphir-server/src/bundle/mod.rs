//! Bundle (transaction/batch) processing
//!
//! POST / — accepts a Bundle of type "transaction" or "batch" and routes
//! each entry through the same versioned operations as the REST endpoints.

mod batch;
mod transaction;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use graphir_core::{GraphirError, IssueType, OperationOutcome};
use graphir_store::prop;

use crate::conditional::{self, ConditionalMatch};
use crate::handlers::{rfc1123, status_for, weak_etag};
use crate::AppState;

/// Parsed entry from a Bundle
#[derive(Debug)]
pub(crate) struct BundleEntry {
    pub method: String,
    pub resource_type: String,
    pub id: Option<String>,
    /// Query string after `?` in request.url, if any.
    pub query: Option<String>,
    pub full_url: Option<String>,
    pub resource: Option<Value>,
    pub if_none_exist: Option<String>,
}

/// Bundle-local urns mapped to the `(graphId, fhirId)` they resolved to.
pub(crate) type RefTable = HashMap<String, (i64, String)>;

/// Parse request.url into resource type, optional id, and optional query.
/// "Patient" -> ("Patient", None, None)
/// "Patient/123" -> ("Patient", Some("123"), None)
/// "Patient?identifier=x" -> ("Patient", None, Some("identifier=x"))
fn parse_request_url(url: &str) -> Option<(String, Option<String>, Option<String>)> {
    let url = url.trim_start_matches('/');
    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (url, None),
    };
    if path.is_empty() {
        return None;
    }
    let mut parts = path.splitn(2, '/');
    let resource_type = parts.next()?.to_string();
    let id = parts.next().filter(|s| !s.is_empty()).map(|s| s.to_string());
    Some((resource_type, id, query))
}

/// Parse all entries from a Bundle value.
fn parse_entries(bundle: &Value) -> Result<Vec<BundleEntry>, OperationOutcome> {
    let entries = bundle
        .get("entry")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            OperationOutcome::error(IssueType::Invalid, "Bundle.entry is missing or not an array")
        })?;

    let mut parsed = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let request = entry.get("request").ok_or_else(|| {
            OperationOutcome::error(
                IssueType::Required,
                format!("entry[{}].request is required", i),
            )
        })?;

        let method = request
            .get("method")
            .and_then(|m| m.as_str())
            .ok_or_else(|| {
                OperationOutcome::error(
                    IssueType::Required,
                    format!("entry[{}].request.method is required", i),
                )
            })?
            .to_string();

        let url = request
            .get("url")
            .and_then(|u| u.as_str())
            .ok_or_else(|| {
                OperationOutcome::error(
                    IssueType::Required,
                    format!("entry[{}].request.url is required", i),
                )
            })?;

        let (resource_type, id, query) = parse_request_url(url).ok_or_else(|| {
            OperationOutcome::error(
                IssueType::Invalid,
                format!("entry[{}].request.url is invalid: '{}'", i, url),
            )
        })?;

        let full_url = entry
            .get("fullUrl")
            .and_then(|f| f.as_str())
            .map(|s| s.to_string());
        let resource = entry.get("resource").cloned();
        let if_none_exist = request
            .get("ifNoneExist")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        parsed.push(BundleEntry {
            method,
            resource_type,
            id,
            query,
            full_url,
            resource,
            if_none_exist,
        });
    }
    Ok(parsed)
}

pub(crate) fn is_supported_method(method: &str) -> bool {
    matches!(method, "GET" | "POST" | "PUT" | "PATCH" | "DELETE")
}

/// HTTP status line for an entry-level failure.
pub(crate) fn status_line(err: &GraphirError) -> String {
    let status = status_for(err);
    format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error")
    )
}

/// Build an error response entry for batch-response.
pub(crate) fn error_entry(status: &str, outcome: OperationOutcome) -> Value {
    json!({
        "response": {
            "status": status,
            "outcome": outcome
        }
    })
}

/// Execute a single bundle entry against the versioned resource layer.
/// Successful entries yield their response-bundle entry; failures bubble to
/// the caller, which decides batch vs. transaction semantics.
pub(crate) async fn execute_entry(
    state: &Arc<AppState>,
    entry: &BundleEntry,
    ref_table: &mut RefTable,
) -> Result<Value, GraphirError> {
    match entry.method.as_str() {
        "GET" => {
            if entry.query.is_some() || entry.id.is_none() {
                return Err(GraphirError::NotImplemented(
                    "search within a bundle is not supported".to_string(),
                ));
            }
            let id = entry.id.as_deref().unwrap_or_default();
            let stored = state.versioned().read_current(&entry.resource_type, id).await?;
            Ok(entry_response("200 OK", Some(&stored), Some(stored.resource.clone())))
        }
        "POST" => {
            // ifNoneExist: conditional create inside the bundle
            if let Some(query) = &entry.if_none_exist {
                let criteria = conditional::parse_criteria(query)?;
                match conditional::probe(state.graph.as_ref(), &entry.resource_type, &criteria, false)
                    .await?
                {
                    ConditionalMatch::None => { /* proceed to create */ }
                    ConditionalMatch::One(existing) => {
                        let existing_id =
                            existing.prop_str(prop::ID).unwrap_or_default().to_string();
                        if let Some(full_url) = &entry.full_url {
                            ref_table.insert(full_url.clone(), (existing.id, existing_id.clone()));
                        }
                        return Ok(json!({
                            "response": {
                                "status": "200 OK",
                                "location": format!("{}/{}", entry.resource_type, existing_id)
                            }
                        }));
                    }
                    ConditionalMatch::Multiple(_) => {
                        return Err(GraphirError::MultipleMatches(format!(
                            "Multiple matches for ifNoneExist: {}",
                            query
                        )));
                    }
                }
            }

            let resource = entry.resource.clone().ok_or_else(|| {
                GraphirError::Validation("entry.resource is required for POST".to_string())
            })?;
            let stored = state.versioned().create(&entry.resource_type, resource).await?;
            if let Some(full_url) = &entry.full_url {
                ref_table.insert(full_url.clone(), (stored.graph_id, stored.fhir_id.clone()));
            }
            let location = format!(
                "{}/{}/_history/{}",
                stored.resource_type, stored.fhir_id, stored.version_id
            );
            Ok(located_response("201 Created", &stored, location))
        }
        "PUT" => {
            let id = entry.id.clone().ok_or_else(|| {
                GraphirError::Validation(
                    "request.url must include resource id for PUT (e.g. 'Patient/123')"
                        .to_string(),
                )
            })?;
            let resource = entry.resource.clone().ok_or_else(|| {
                GraphirError::Validation("entry.resource is required for PUT".to_string())
            })?;
            let stored = state.versioned().write(&entry.resource_type, &id, resource).await?;
            let status = if stored.created { "201 Created" } else { "200 OK" };
            let location = format!(
                "{}/{}/_history/{}",
                stored.resource_type, stored.fhir_id, stored.version_id
            );
            Ok(located_response(status, &stored, location))
        }
        "PATCH" => {
            let id = entry.id.clone().ok_or_else(|| {
                GraphirError::Validation(
                    "request.url must include resource id for PATCH (e.g. 'Patient/123')"
                        .to_string(),
                )
            })?;
            let patch_body = entry.resource.clone().ok_or_else(|| {
                GraphirError::Validation("entry.resource must carry the patch for PATCH".to_string())
            })?;
            let stored = state
                .versioned()
                .patch(&entry.resource_type, &id, &patch_body)
                .await?;
            Ok(entry_response("200 OK", Some(&stored), None))
        }
        "DELETE" => {
            let id = entry.id.clone().ok_or_else(|| {
                GraphirError::Validation(
                    "request.url must include resource id for DELETE (e.g. 'Patient/123')"
                        .to_string(),
                )
            })?;
            state.versioned().tombstone(&entry.resource_type, &id).await?;
            Ok(json!({"response": {"status": "204 No Content"}}))
        }
        other => Err(GraphirError::Validation(format!(
            "method '{}' is not supported in a bundle",
            other
        ))),
    }
}

fn entry_response(
    status: &str,
    stored: Option<&crate::versioning::StoredVersion>,
    resource: Option<Value>,
) -> Value {
    let mut response = json!({"status": status});
    if let Some(stored) = stored {
        response["etag"] = json!(weak_etag(&stored.version_id));
        if let Some(lm) = stored.last_updated.as_deref().and_then(rfc1123) {
            response["lastModified"] = json!(lm);
        }
    }
    let mut entry = json!({"response": response});
    if let Some(resource) = resource {
        entry["resource"] = resource;
    }
    entry
}

fn located_response(
    status: &str,
    stored: &crate::versioning::StoredVersion,
    location: String,
) -> Value {
    let mut entry = entry_response(status, Some(stored), None);
    entry["response"]["location"] = json!(location);
    entry
}

/// POST / — process a Bundle (transaction or batch)
pub async fn process_bundle(
    State(state): State<Arc<AppState>>,
    Json(bundle): Json<Value>,
) -> Response {
    let resource_type = bundle.get("resourceType").and_then(|v| v.as_str());
    if resource_type != Some("Bundle") {
        let outcome = OperationOutcome::invalid("resourceType must be 'Bundle'");
        return (StatusCode::BAD_REQUEST, Json(json!(outcome))).into_response();
    }

    let bundle_type = match bundle.get("type").and_then(|v| v.as_str()) {
        Some(t @ ("transaction" | "batch")) => t.to_string(),
        _ => {
            let outcome = OperationOutcome::invalid("Bundle.type must be 'transaction' or 'batch'");
            return (StatusCode::BAD_REQUEST, Json(json!(outcome))).into_response();
        }
    };

    let entries = match parse_entries(&bundle) {
        Ok(entries) => entries,
        Err(outcome) => {
            return (StatusCode::BAD_REQUEST, Json(json!(outcome))).into_response();
        }
    };

    if bundle_type == "transaction" {
        transaction::process_transaction(&state, entries).await
    } else {
        batch::process_batch(&state, entries).await
    }
}
