//! Turns `reference` fields inside a resource body into typed graph edges.
//!
//! Each relative reference becomes one `fhir:ref:<path>` edge from the
//! source vertex to the target resource's vertex. Creation is idempotent:
//! an edge that already exists is left alone and not counted. Failures on
//! one reference never fail the write that triggered materialization.

use serde_json::Value;

use graphir_core::reference::extract_references;

use crate::graph::{edge, prop, GraphStore, PropMap};

/// Materialize every relative reference in `resource` as an edge out of
/// `source_vertex`. Returns the number of edges actually created.
///
/// With `allow_placeholders`, a reference to a resource that is not in the
/// graph yet gets a placeholder target vertex; otherwise the reference is
/// dropped silently.
pub async fn materialize(
    graph: &dyn GraphStore,
    source_vertex: i64,
    resource: &Value,
    allow_placeholders: bool,
) -> usize {
    let mut created = 0;

    for reference in extract_references(resource) {
        let label = format!("{}{}", edge::REF_PREFIX, reference.path);

        let target = match resolve_target(graph, &reference.target_type, &reference.target_id, allow_placeholders).await {
            Ok(Some(target)) => target,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(
                    path = %reference.path,
                    target = %format!("{}/{}", reference.target_type, reference.target_id),
                    error = %e,
                    "skipping reference: target resolution failed"
                );
                continue;
            }
        };

        match graph.edge_exists(&label, source_vertex, target).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(path = %reference.path, error = %e, "skipping reference: edge probe failed");
                continue;
            }
        }

        let mut props = PropMap::new();
        props.insert(prop::PATH.to_string(), Value::String(reference.path.clone()));
        props.insert(
            prop::TARGET_TYPE.to_string(),
            Value::String(reference.target_type.clone()),
        );
        props.insert(
            prop::TARGET_ID.to_string(),
            Value::String(reference.target_id.clone()),
        );

        match graph.add_edge(&label, source_vertex, target, props).await {
            Ok(()) => created += 1,
            Err(e) => {
                tracing::warn!(path = %reference.path, error = %e, "skipping reference: edge creation failed");
            }
        }
    }

    created
}

/// Find the vertex a reference points at. An existing vertex — current
/// version preferred — wins; placeholders are only created when nothing is
/// there at all.
async fn resolve_target(
    graph: &dyn GraphStore,
    target_type: &str,
    target_id: &str,
    allow_placeholders: bool,
) -> crate::error::Result<Option<i64>> {
    if let Some(current) = graph.current_version(target_type, target_id).await? {
        return Ok(Some(current.id));
    }
    if let Some(id) = graph
        .vertex_id_by_label_and_property(target_type, prop::ID, target_id)
        .await?
    {
        return Ok(Some(id));
    }
    if !allow_placeholders {
        return Ok(None);
    }

    let mut props = PropMap::new();
    props.insert(
        prop::RESOURCE_TYPE.to_string(),
        Value::String(target_type.to_string()),
    );
    props.insert(prop::ID.to_string(), Value::String(target_id.to_string()));
    props.insert(prop::IS_PLACEHOLDER.to_string(), Value::Bool(true));
    graph
        .upsert_vertex_by_property(target_type, prop::ID, target_id, props)
        .await
        .map(Some)
}
