//! Versioned resource storage over the graph store.
//!
//! Every write lands as a new version vertex via the backend's versioning
//! primitives; nothing is mutated in place. Writes for the same
//! `(resourceType, id)` are serialized through a keyed lock so concurrent
//! updates cannot observe the same version number.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use graphir_core::{
    identifier_values, inject_meta, patch, GraphirError, Resource, Result, SchemaValidator,
};
use graphir_store::{materializer, prop, GraphStore, PropMap, Vertex};

use crate::persist::backend;

pub type WriteLocks = DashMap<String, Arc<Mutex<()>>>;

pub struct VersionedStore<'a> {
    graph: &'a dyn GraphStore,
    validator: &'a SchemaValidator,
    locks: &'a WriteLocks,
}

/// A stored resource version, body with `meta` already injected.
#[derive(Debug, Clone)]
pub struct StoredVersion {
    pub graph_id: i64,
    pub resource_type: String,
    pub fhir_id: String,
    pub version_id: String,
    pub last_updated: Option<String>,
    pub resource: Value,
    pub created: bool,
}

/// One entry of a history listing.
#[derive(Debug, Clone)]
pub struct HistoryVersion {
    pub resource_type: String,
    pub fhir_id: String,
    pub version_id: String,
    pub last_updated: Option<String>,
    pub deleted: bool,
    pub resource: Option<Value>,
}

impl HistoryVersion {
    /// The request method that produced this version.
    pub fn method(&self) -> &'static str {
        if self.deleted {
            "DELETE"
        } else if self.version_id == "1" {
            "POST"
        } else {
            "PUT"
        }
    }

    pub fn status(&self) -> &'static str {
        if self.deleted {
            "204 No Content"
        } else if self.version_id == "1" {
            "201 Created"
        } else {
            "200 OK"
        }
    }
}

impl<'a> VersionedStore<'a> {
    pub fn new(
        graph: &'a dyn GraphStore,
        validator: &'a SchemaValidator,
        locks: &'a WriteLocks,
    ) -> Self {
        Self {
            graph,
            validator,
            locks,
        }
    }

    async fn lock(&self, resource_type: &str, fhir_id: &str) -> OwnedMutexGuard<()> {
        let key = format!("{}|{}", resource_type, fhir_id);
        let mutex = self.locks.entry(key).or_default().clone();
        mutex.lock_owned().await
    }

    /// Create a resource, taking the id from the body or assigning one.
    pub async fn create(&self, resource_type: &str, body: Value) -> Result<StoredVersion> {
        let (body_type, body_id) = self
            .validator
            .extract_resource_info(&body)
            .map_err(GraphirError::Validation)?;
        if body_type != resource_type {
            return Err(GraphirError::Validation(format!(
                "resourceType mismatch: body says {}, request says {}",
                body_type, resource_type
            )));
        }
        let fhir_id = body_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.write(resource_type, &fhir_id, body).await
    }

    /// Write a new version of `(resourceType, id)`.
    pub async fn write(
        &self,
        resource_type: &str,
        fhir_id: &str,
        body: Value,
    ) -> Result<StoredVersion> {
        self.validator
            .validate(&body)
            .map_err(GraphirError::Validation)?;
        let (body_type, _) = self
            .validator
            .extract_resource_info(&body)
            .map_err(GraphirError::Validation)?;
        if body_type != resource_type {
            return Err(GraphirError::Validation(format!(
                "resourceType mismatch: body says {}, request says {}",
                body_type, resource_type
            )));
        }

        // The logical id in the stored body always reflects the request.
        let mut resource: Resource = serde_json::from_value(body)
            .map_err(|e| GraphirError::Validation(format!("Invalid resource: {}", e)))?;
        resource.id = Some(fhir_id.to_string());
        let mut body = serde_json::to_value(&resource)?;

        let mut props = PropMap::new();
        props.insert(
            prop::RESOURCE_TYPE.to_string(),
            Value::String(resource_type.to_string()),
        );
        props.insert(
            prop::JSON.to_string(),
            Value::String(serde_json::to_string(&body)?),
        );
        props.insert(prop::IS_DELETED.to_string(), Value::Bool(false));
        let identifiers = identifier_values(&body);
        if !identifiers.is_empty() {
            props.insert(
                prop::IDENTIFIER.to_string(),
                Value::Array(identifiers.into_iter().map(Value::String).collect()),
            );
        }

        let _guard = self.lock(resource_type, fhir_id).await;

        let (graph_id, version) = self
            .graph
            .create_versioned_vertex(resource_type, fhir_id, props)
            .await
            .map_err(backend)?;

        let last_updated = self
            .graph
            .vertex_by_id(graph_id)
            .await
            .map_err(backend)?
            .and_then(|v| v.prop_str(prop::LAST_UPDATED).map(|s| s.to_string()));

        let materialized = materializer::materialize(self.graph, graph_id, &body, true).await;
        tracing::debug!(
            resource = %format!("{}/{}", resource_type, fhir_id),
            version,
            materialized,
            "stored resource version"
        );

        let version_id = version.to_string();
        inject_meta(&mut body, Some(&version_id), last_updated.as_deref());

        Ok(StoredVersion {
            graph_id,
            resource_type: resource_type.to_string(),
            fhir_id: fhir_id.to_string(),
            version_id,
            last_updated,
            resource: body,
            created: version == 1,
        })
    }

    /// The current version of a resource. Tombstoned or absent resources
    /// both read as not found.
    pub async fn read_current(&self, resource_type: &str, fhir_id: &str) -> Result<StoredVersion> {
        let vertex = self
            .graph
            .current_version(resource_type, fhir_id)
            .await
            .map_err(backend)?
            .ok_or_else(|| GraphirError::not_found(resource_type, fhir_id))?;
        if vertex.prop_bool(prop::IS_DELETED) {
            return Err(GraphirError::not_found(resource_type, fhir_id));
        }
        vertex_to_stored(vertex, resource_type, fhir_id)
    }

    /// Read one specific version.
    pub async fn vread(
        &self,
        resource_type: &str,
        fhir_id: &str,
        version_id: &str,
    ) -> Result<StoredVersion> {
        let vertex = self
            .graph
            .version(resource_type, fhir_id, version_id)
            .await
            .map_err(backend)?
            .ok_or_else(|| GraphirError::VersionNotFound {
                resource_type: resource_type.to_string(),
                id: fhir_id.to_string(),
                version_id: version_id.to_string(),
            })?;
        if vertex.prop_bool(prop::IS_DELETED) {
            return Err(GraphirError::Gone {
                resource_type: resource_type.to_string(),
                id: fhir_id.to_string(),
                version_id: version_id.to_string(),
            });
        }
        vertex_to_stored(vertex, resource_type, fhir_id)
    }

    /// Soft delete: append a tombstone version.
    pub async fn tombstone(&self, resource_type: &str, fhir_id: &str) -> Result<(i64, i64)> {
        let _guard = self.lock(resource_type, fhir_id).await;

        let current = self
            .graph
            .current_version(resource_type, fhir_id)
            .await
            .map_err(backend)?
            .ok_or_else(|| GraphirError::not_found(resource_type, fhir_id))?;
        if current.prop_bool(prop::IS_DELETED) {
            return Err(GraphirError::Conflict(format!(
                "{}/{} is already deleted",
                resource_type, fhir_id
            )));
        }

        self.graph
            .create_tombstone(resource_type, fhir_id)
            .await
            .map_err(backend)?
            .ok_or_else(|| GraphirError::not_found(resource_type, fhir_id))
    }

    /// Read-patch-validate-write. Patch parse or apply failures are
    /// unprocessable; the patched body is re-validated before storage.
    pub async fn patch(
        &self,
        resource_type: &str,
        fhir_id: &str,
        patch_body: &Value,
    ) -> Result<StoredVersion> {
        let existing = self.read_current(resource_type, fhir_id).await?;
        let ops = patch::parse_patch(patch_body).map_err(GraphirError::Unprocessable)?;
        let patched = patch::apply(&existing.resource, &ops).ok_or_else(|| {
            GraphirError::Unprocessable("patch could not be applied".to_string())
        })?;
        self.write(resource_type, fhir_id, patched).await
    }

    pub async fn instance_history(
        &self,
        resource_type: &str,
        fhir_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryVersion>> {
        let vertices = self
            .graph
            .version_history(resource_type, fhir_id, limit)
            .await
            .map_err(backend)?;
        Ok(vertices.into_iter().map(vertex_to_history).collect())
    }

    pub async fn type_history(
        &self,
        resource_type: &str,
        limit: Option<usize>,
        since: Option<&str>,
    ) -> Result<Vec<HistoryVersion>> {
        let vertices = self
            .graph
            .type_history(resource_type, limit, since)
            .await
            .map_err(backend)?;
        Ok(vertices.into_iter().map(vertex_to_history).collect())
    }

    /// History across every supported type, globally ordered newest first.
    pub async fn system_history(
        &self,
        limit: Option<usize>,
        since: Option<&str>,
    ) -> Result<Vec<HistoryVersion>> {
        let mut all = Vec::new();
        for resource_type in self.validator.supported_types() {
            let mut entries = self.type_history(resource_type, None, since).await?;
            all.append(&mut entries);
        }
        all.sort_by_key(|h| {
            let ts = h
                .last_updated
                .as_deref()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH);
            let vid: i64 = h.version_id.parse().unwrap_or(0);
            std::cmp::Reverse((ts, vid))
        });
        if let Some(limit) = limit {
            all.truncate(limit);
        }
        Ok(all)
    }

    /// Drop every version vertex of a resource. Returns how many went.
    pub async fn delete_all_versions(&self, resource_type: &str, fhir_id: &str) -> Result<i64> {
        let _guard = self.lock(resource_type, fhir_id).await;
        self.graph
            .delete_all_versions(resource_type, fhir_id)
            .await
            .map_err(backend)
    }

    /// Drop a single non-current version vertex.
    pub async fn delete_version(
        &self,
        resource_type: &str,
        fhir_id: &str,
        version_id: &str,
    ) -> Result<()> {
        let _guard = self.lock(resource_type, fhir_id).await;

        let vertex = self
            .graph
            .version(resource_type, fhir_id, version_id)
            .await
            .map_err(backend)?
            .ok_or_else(|| GraphirError::VersionNotFound {
                resource_type: resource_type.to_string(),
                id: fhir_id.to_string(),
                version_id: version_id.to_string(),
            })?;
        if vertex.prop_bool(prop::IS_CURRENT) {
            return Err(GraphirError::Conflict(format!(
                "{}/{}/_history/{} is the current version",
                resource_type, fhir_id, version_id
            )));
        }
        self.graph
            .delete_version(resource_type, fhir_id, version_id)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

fn vertex_to_stored(vertex: Vertex, resource_type: &str, fhir_id: &str) -> Result<StoredVersion> {
    let version_id = vertex
        .prop_str(prop::VERSION_ID)
        .map(|s| s.to_string())
        .unwrap_or_else(|| vertex.id.to_string());
    let last_updated = vertex.prop_str(prop::LAST_UPDATED).map(|s| s.to_string());
    let json = vertex.prop_str(prop::JSON).ok_or_else(|| {
        GraphirError::Backend(format!(
            "version vertex {} has no stored body",
            vertex.id
        ))
    })?;
    let mut resource: Value = serde_json::from_str(json)?;
    inject_meta(&mut resource, Some(&version_id), last_updated.as_deref());

    Ok(StoredVersion {
        graph_id: vertex.id,
        resource_type: resource_type.to_string(),
        fhir_id: fhir_id.to_string(),
        version_id,
        last_updated,
        resource,
        created: false,
    })
}

fn vertex_to_history(vertex: Vertex) -> HistoryVersion {
    let version_id = vertex
        .prop_str(prop::VERSION_ID)
        .map(|s| s.to_string())
        .unwrap_or_else(|| vertex.id.to_string());
    let last_updated = vertex.prop_str(prop::LAST_UPDATED).map(|s| s.to_string());
    let deleted = vertex.prop_bool(prop::IS_DELETED);
    let fhir_id = vertex.prop_str(prop::ID).unwrap_or_default().to_string();
    let resource = if deleted {
        None
    } else {
        vertex.prop_str(prop::JSON).and_then(|json| {
            serde_json::from_str::<Value>(json).ok().map(|mut r| {
                inject_meta(&mut r, Some(&version_id), last_updated.as_deref());
                r
            })
        })
    };

    HistoryVersion {
        resource_type: vertex.label,
        fhir_id,
        version_id,
        last_updated,
        deleted,
        resource,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphir_store::SqliteGraph;
    use serde_json::json;

    fn validator() -> SchemaValidator {
        SchemaValidator::from_value(json!({
            "discriminator": {"mapping": {
                "Patient": "#/definitions/Patient",
                "Observation": "#/definitions/Observation"
            }},
            "definitions": {}
        }))
    }

    #[tokio::test]
    async fn test_create_update_history() {
        let graph = SqliteGraph::open(":memory:").unwrap();
        let validator = validator();
        let locks = WriteLocks::default();
        let store = VersionedStore::new(&graph, &validator, &locks);

        let created = store
            .create("Patient", json!({"resourceType": "Patient", "id": "p1", "gender": "male"}))
            .await
            .unwrap();
        assert!(created.created);
        assert_eq!(created.version_id, "1");
        assert_eq!(created.resource["meta"]["versionId"], "1");

        let updated = store
            .write("Patient", "p1", json!({"resourceType": "Patient", "gender": "female"}))
            .await
            .unwrap();
        assert!(!updated.created);
        assert_eq!(updated.version_id, "2");
        assert_eq!(updated.resource["id"], "p1");

        let current = store.read_current("Patient", "p1").await.unwrap();
        assert_eq!(current.version_id, "2");
        assert_eq!(current.resource["gender"], "female");

        let history = store.instance_history("Patient", "p1", None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version_id, "2");
        assert_eq!(history[0].method(), "PUT");
        assert_eq!(history[1].method(), "POST");
    }

    #[tokio::test]
    async fn test_tombstone_and_vread() {
        let graph = SqliteGraph::open(":memory:").unwrap();
        let validator = validator();
        let locks = WriteLocks::default();
        let store = VersionedStore::new(&graph, &validator, &locks);

        store
            .create("Patient", json!({"resourceType": "Patient", "id": "p1"}))
            .await
            .unwrap();
        let (_, vid) = store.tombstone("Patient", "p1").await.unwrap();
        assert_eq!(vid, 2);

        // the current version is now a tombstone: reads say not-found
        assert!(matches!(
            store.read_current("Patient", "p1").await,
            Err(GraphirError::NotFound { .. })
        ));

        // vread of the tombstone is gone, of the prior version is fine
        assert!(matches!(
            store.vread("Patient", "p1", "2").await,
            Err(GraphirError::Gone { .. })
        ));
        assert!(store.vread("Patient", "p1", "1").await.is_ok());
        assert!(matches!(
            store.vread("Patient", "p1", "9").await,
            Err(GraphirError::VersionNotFound { .. })
        ));

        // deleting an already-deleted resource is a conflict
        assert!(matches!(
            store.tombstone("Patient", "p1").await,
            Err(GraphirError::Conflict(_))
        ));

        // history keeps both versions, tombstone first and body-less
        let history = store.instance_history("Patient", "p1", None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].deleted);
        assert!(history[0].resource.is_none());
        assert_eq!(history[0].method(), "DELETE");
    }

    #[tokio::test]
    async fn test_update_after_tombstone_resurrects() {
        let graph = SqliteGraph::open(":memory:").unwrap();
        let validator = validator();
        let locks = WriteLocks::default();
        let store = VersionedStore::new(&graph, &validator, &locks);

        store
            .create("Patient", json!({"resourceType": "Patient", "id": "p1"}))
            .await
            .unwrap();
        store.tombstone("Patient", "p1").await.unwrap();

        let revived = store
            .write("Patient", "p1", json!({"resourceType": "Patient"}))
            .await
            .unwrap();
        assert_eq!(revived.version_id, "3");
        assert!(store.read_current("Patient", "p1").await.is_ok());
    }

    #[tokio::test]
    async fn test_patch_flow() {
        let graph = SqliteGraph::open(":memory:").unwrap();
        let validator = validator();
        let locks = WriteLocks::default();
        let store = VersionedStore::new(&graph, &validator, &locks);

        store
            .create("Patient", json!({"resourceType": "Patient", "id": "p1", "gender": "male"}))
            .await
            .unwrap();

        let patched = store
            .patch(
                "Patient",
                "p1",
                &json!([{"op": "replace", "path": "/gender", "value": "female"}]),
            )
            .await
            .unwrap();
        assert_eq!(patched.version_id, "2");
        assert_eq!(patched.resource["gender"], "female");

        let failed = store
            .patch(
                "Patient",
                "p1",
                &json!([{"op": "test", "path": "/gender", "value": "unknown"}]),
            )
            .await;
        assert!(matches!(failed, Err(GraphirError::Unprocessable(_))));

        let missing = store
            .patch("Patient", "nope", &json!([{"op": "remove", "path": "/gender"}]))
            .await;
        assert!(matches!(missing, Err(GraphirError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_version_guards() {
        let graph = SqliteGraph::open(":memory:").unwrap();
        let validator = validator();
        let locks = WriteLocks::default();
        let store = VersionedStore::new(&graph, &validator, &locks);

        store
            .create("Patient", json!({"resourceType": "Patient", "id": "p1"}))
            .await
            .unwrap();
        store
            .write("Patient", "p1", json!({"resourceType": "Patient"}))
            .await
            .unwrap();

        assert!(matches!(
            store.delete_version("Patient", "p1", "2").await,
            Err(GraphirError::Conflict(_))
        ));
        assert!(store.delete_version("Patient", "p1", "1").await.is_ok());
        assert!(matches!(
            store.delete_version("Patient", "p1", "1").await,
            Err(GraphirError::VersionNotFound { .. })
        ));

        assert_eq!(store.delete_all_versions("Patient", "p1").await.unwrap(), 1);
    }
}
