use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use graphir_core::inject_meta;

use super::{parse_count, ApiError};
use crate::conditional::{current_view_filters, parse_criteria};
use crate::persist::SearchResult;
use crate::AppState;

/// Default page size
const DEFAULT_COUNT: usize = 100;

/// Search query parameters
#[derive(Deserialize, Default)]
pub struct SearchParams {
    #[serde(flatten)]
    pub params: std::collections::HashMap<String, String>,
}

impl SearchParams {
    /// Rebuild the search-relevant part of the query string.
    fn criteria_string(&self) -> String {
        self.params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn result_entry(result: &SearchResult) -> Option<Value> {
    let json_text = result.json.as_deref()?;
    let mut resource: Value = serde_json::from_str(json_text).ok()?;
    inject_meta(
        &mut resource,
        result.version_id.as_deref(),
        result.last_updated.as_deref(),
    );
    let full_url = format!(
        "{}/{}",
        result.resource_type,
        result.fhir_id.as_deref().unwrap_or_default()
    );
    Some(json!({
        "fullUrl": full_url,
        "resource": resource,
        "search": {"mode": "match"}
    }))
}

fn searchset(total: i64, entries: Vec<Value>, self_url: String) -> Value {
    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": total,
        "link": [{"relation": "self", "url": self_url}],
        "entry": entries
    })
}

/// Search (GET /{resource_type}?...)
pub async fn search(
    State(state): State<Arc<AppState>>,
    Path(resource_type): Path<String>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ApiError> {
    let criteria = parse_criteria(&params.criteria_string())?;
    let limit = parse_count(params.params.get("_count")).unwrap_or(DEFAULT_COUNT);
    let offset = parse_count(params.params.get("_offset")).unwrap_or(0);

    let filters = current_view_filters(&criteria);
    let (results, total) = state
        .persistence()
        .search(&resource_type, &filters, Some(limit), offset)
        .await?;

    let entries = results
        .iter()
        .filter(|r| !r.is_placeholder)
        .filter_map(result_entry)
        .collect();

    let self_url = if params.params.is_empty() {
        format!("{}/{}", state.fhir_base_url(), resource_type)
    } else {
        format!(
            "{}/{}?{}",
            state.fhir_base_url(),
            resource_type,
            params.criteria_string()
        )
    };

    Ok(Json(searchset(total, entries, self_url)))
}

/// Cross-type search (GET /_search?_type=A,B&...). Without `_type`, every
/// supported resource type is scanned.
pub async fn search_all_types(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ApiError> {
    let criteria = parse_criteria(&params.criteria_string())?;
    let limit = parse_count(params.params.get("_count")).unwrap_or(DEFAULT_COUNT);

    let types: Option<Vec<String>> = params.params.get("_type").map(|list| {
        list.split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    });

    let filters = current_view_filters(&criteria);
    let (results, total) = state
        .persistence()
        .search_all_types(types.as_deref(), &filters, Some(limit))
        .await?;

    let entries = results
        .iter()
        .filter(|r| !r.is_placeholder)
        .filter_map(result_entry)
        .collect();

    let self_url = format!("{}/_search?{}", state.fhir_base_url(), params.criteria_string());
    Ok(Json(searchset(total, entries, self_url)))
}
