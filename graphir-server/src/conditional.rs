//! Conditional operations: the target of the request is chosen by search
//! criteria, and the outcome depends on how many resources match.
//!
//! The probe searches the current view (`isCurrent=true`, `isDeleted=false`)
//! with a limit of two; only a multi-delete needs to see every match.

use serde_json::Value;

use graphir_core::{GraphirError, Result};
use graphir_store::{prop, GraphStore, Vertex};

use crate::persist::backend;
use crate::versioning::{StoredVersion, VersionedStore};

/// Parse an `If-None-Exist` header or conditional query string into
/// property filters. Only `_id` and `identifier` are searchable; other
/// control parameters (`_count`, `_format`, ...) are ignored.
pub fn parse_criteria(query: &str) -> Result<Vec<(String, String)>> {
    let mut filters = Vec::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or_default();
        let raw_value = parts.next().unwrap_or_default();
        let key = urlencoding::decode(key)
            .map_err(|e| GraphirError::Validation(e.to_string()))?
            .into_owned();
        let value = urlencoding::decode(raw_value)
            .map_err(|e| GraphirError::Validation(e.to_string()))?
            .into_owned();

        match key.as_str() {
            "_id" => filters.push((prop::ID.to_string(), value)),
            "identifier" => filters.push((prop::IDENTIFIER.to_string(), value)),
            other if other.starts_with('_') => {}
            other => {
                return Err(GraphirError::Validation(format!(
                    "Unsupported search parameter: {}",
                    other
                )));
            }
        }
    }
    Ok(filters)
}

/// Criteria plus the current-view restriction.
pub fn current_view_filters(criteria: &[(String, String)]) -> Vec<(String, String)> {
    let mut filters = criteria.to_vec();
    filters.push((prop::IS_CURRENT.to_string(), "true".to_string()));
    filters.push((prop::IS_DELETED.to_string(), "false".to_string()));
    filters
}

pub enum ConditionalMatch {
    None,
    One(Box<Vertex>),
    Multiple(Vec<Vertex>),
}

/// Search for resources matching the criteria. The probe stops at two
/// matches unless the caller needs them all.
pub async fn probe(
    graph: &dyn GraphStore,
    resource_type: &str,
    criteria: &[(String, String)],
    all_matches: bool,
) -> Result<ConditionalMatch> {
    let filters = current_view_filters(criteria);
    let limit = if all_matches { None } else { Some(2) };
    let mut matches = graph
        .vertices_by_label(resource_type, &filters, limit, 0)
        .await
        .map_err(backend)?;

    Ok(match matches.len() {
        0 => ConditionalMatch::None,
        1 => ConditionalMatch::One(Box::new(matches.remove(0))),
        _ => ConditionalMatch::Multiple(matches),
    })
}

/// Conditional update: `PUT /{type}?criteria`.
pub async fn conditional_update(
    graph: &dyn GraphStore,
    store: &VersionedStore<'_>,
    resource_type: &str,
    criteria: &[(String, String)],
    body: Value,
) -> Result<StoredVersion> {
    if criteria.is_empty() {
        return Err(GraphirError::Validation(
            "Conditional update requires search parameters".to_string(),
        ));
    }
    let body_id = body.get("id").and_then(|v| v.as_str()).map(|s| s.to_string());

    match probe(graph, resource_type, criteria, false).await? {
        ConditionalMatch::None => match body_id {
            Some(id) => store.write(resource_type, &id, body).await,
            None => Err(GraphirError::Validation(
                "Conditional update matched nothing and the resource has no id".to_string(),
            )),
        },
        ConditionalMatch::One(matched) => {
            let matched_id = matched
                .prop_str(prop::ID)
                .ok_or_else(|| GraphirError::Backend("matched vertex has no id".to_string()))?
                .to_string();
            if let Some(body_id) = body_id {
                if body_id != matched_id {
                    return Err(GraphirError::Validation(format!(
                        "Resource id {} does not match the resource selected by the criteria ({})",
                        body_id, matched_id
                    )));
                }
            }
            store.write(resource_type, &matched_id, body).await
        }
        ConditionalMatch::Multiple(_) => Err(GraphirError::MultipleMatches(
            "Multiple matches found for conditional update".to_string(),
        )),
    }
}

/// Conditional delete: `DELETE /{type}?criteria`. Returns how many
/// resources were tombstoned.
pub async fn conditional_delete(
    graph: &dyn GraphStore,
    store: &VersionedStore<'_>,
    resource_type: &str,
    criteria: &[(String, String)],
    allow_multiple: bool,
) -> Result<usize> {
    if criteria.is_empty() {
        return Err(GraphirError::Validation(
            "Conditional delete requires search parameters".to_string(),
        ));
    }

    match probe(graph, resource_type, criteria, allow_multiple).await? {
        ConditionalMatch::None => Ok(0),
        ConditionalMatch::One(matched) => {
            delete_matched(store, resource_type, &matched).await?;
            Ok(1)
        }
        ConditionalMatch::Multiple(matches) => {
            if !allow_multiple {
                return Err(GraphirError::MultipleMatches(
                    "Multiple matches found for conditional delete".to_string(),
                ));
            }
            let mut deleted = 0;
            for matched in &matches {
                delete_matched(store, resource_type, matched).await?;
                deleted += 1;
            }
            Ok(deleted)
        }
    }
}

async fn delete_matched(
    store: &VersionedStore<'_>,
    resource_type: &str,
    matched: &Vertex,
) -> Result<()> {
    let id = matched
        .prop_str(prop::ID)
        .ok_or_else(|| GraphirError::Backend("matched vertex has no id".to_string()))?;
    store.tombstone(resource_type, id).await?;
    Ok(())
}

/// Conditional patch: `PATCH /{type}?criteria`.
pub async fn conditional_patch(
    graph: &dyn GraphStore,
    store: &VersionedStore<'_>,
    resource_type: &str,
    criteria: &[(String, String)],
    patch_body: &Value,
) -> Result<StoredVersion> {
    if criteria.is_empty() {
        return Err(GraphirError::Validation(
            "Conditional patch requires search parameters".to_string(),
        ));
    }

    match probe(graph, resource_type, criteria, false).await? {
        ConditionalMatch::None => Err(GraphirError::NotFound {
            resource_type: resource_type.to_string(),
            id: format!("?{}", criteria_summary(criteria)),
        }),
        ConditionalMatch::One(matched) => {
            let id = matched
                .prop_str(prop::ID)
                .ok_or_else(|| GraphirError::Backend("matched vertex has no id".to_string()))?
                .to_string();
            store.patch(resource_type, &id, patch_body).await
        }
        ConditionalMatch::Multiple(_) => Err(GraphirError::MultipleMatches(
            "Multiple matches found for conditional patch".to_string(),
        )),
    }
}

fn criteria_summary(criteria: &[(String, String)]) -> String {
    criteria
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}
