//! The graph repository contract.
//!
//! Everything above the storage layer talks to this trait. Backend-native
//! edge identifiers never cross it: an edge is identified by
//! `(label, out vertex, in vertex)` and its existence is answered by a
//! count. Lookup keys are compared as strings.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Property names shared between the resource layer and the backend.
pub mod prop {
    pub const ID: &str = "id";
    pub const RESOURCE_TYPE: &str = "resourceType";
    pub const JSON: &str = "json";
    pub const VERSION_ID: &str = "versionId";
    pub const LAST_UPDATED: &str = "lastUpdated";
    pub const IS_CURRENT: &str = "isCurrent";
    pub const IS_DELETED: &str = "isDeleted";
    pub const IS_PLACEHOLDER: &str = "isPlaceholder";
    pub const IDENTIFIER: &str = "identifier";
    pub const PATH: &str = "path";
    pub const TARGET_TYPE: &str = "targetResourceType";
    pub const TARGET_ID: &str = "targetFhirId";
}

/// Edge labels.
pub mod edge {
    /// Audit edge from a newer version vertex to its immediate predecessor.
    pub const SUPERSEDES: &str = "supersedes";
    /// Prefix for materialized reference edges; the dotted reference path
    /// follows, e.g. `fhir:ref:subject.reference`.
    pub const REF_PREFIX: &str = "fhir:ref:";
}

/// Property map of a vertex or edge. Multi-valued properties are arrays;
/// singletons are plain scalars.
pub type PropMap = BTreeMap<String, Value>;

#[derive(Debug, Clone)]
pub struct Vertex {
    pub id: i64,
    pub label: String,
    pub properties: PropMap,
}

impl Vertex {
    pub fn prop_str(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(|v| v.as_str())
    }

    pub fn prop_bool(&self, name: &str) -> bool {
        self.properties
            .get(name)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
}

/// One edge incident to a vertex, seen from that vertex.
#[derive(Debug, Clone)]
pub struct EdgeRecord {
    pub direction: Direction,
    pub label: String,
    pub other_vertex: i64,
    pub properties: PropMap,
}

/// Equality filters for label-scoped scans: `(property name, value)` pairs,
/// compared as strings.
pub type Filters = [(String, String)];

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn add_vertex(&self, label: &str, props: PropMap) -> Result<Vertex>;
    async fn add_vertex_returning_id(&self, label: &str, props: PropMap) -> Result<i64>;
    async fn vertex_by_id(&self, id: i64) -> Result<Option<Vertex>>;
    /// Set/overwrite the given properties. `false` when the vertex is gone.
    async fn update_vertex_properties(&self, id: i64, props: PropMap) -> Result<bool>;
    async fn delete_vertex(&self, id: i64) -> Result<bool>;
    async fn count_vertices(&self) -> Result<i64>;
    /// Remove every vertex (and, with them, every edge). Returns how many
    /// vertices were dropped.
    async fn drop_all(&self) -> Result<i64>;

    /// Find-or-create a vertex by `(label, key = value)`, then apply props.
    async fn upsert_vertex_by_property(
        &self,
        label: &str,
        key: &str,
        value: &str,
        props: PropMap,
    ) -> Result<i64>;
    /// First match in deterministic backend order.
    async fn vertex_by_label_and_property(
        &self,
        label: &str,
        key: &str,
        value: &str,
    ) -> Result<Option<Vertex>>;
    async fn vertex_id_by_label_and_property(
        &self,
        label: &str,
        key: &str,
        value: &str,
    ) -> Result<Option<i64>>;

    async fn add_edge(&self, label: &str, out: i64, into: i64, props: PropMap) -> Result<()>;
    /// Resolve both endpoints by `(label, key = value)` and connect them.
    /// `false` when either endpoint is missing.
    async fn add_edge_by_property(
        &self,
        label: &str,
        out_label: &str,
        out_key: &str,
        out_value: &str,
        in_label: &str,
        in_key: &str,
        in_value: &str,
        props: PropMap,
    ) -> Result<bool>;
    async fn edge_exists(&self, label: &str, out: i64, into: i64) -> Result<bool>;
    async fn edges_for_vertex(&self, id: i64) -> Result<Vec<EdgeRecord>>;

    async fn vertices_by_label(
        &self,
        label: &str,
        filters: &Filters,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Vertex>>;
    async fn count_vertices_by_label(&self, label: &str, filters: &Filters) -> Result<i64>;

    async fn out_neighbors(
        &self,
        id: i64,
        edge_label: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Vertex>>;
    async fn in_neighbors(
        &self,
        id: i64,
        edge_label: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Vertex>>;
    /// Breadth-first walk over both edge directions, deduplicating on first
    /// visit. Returns every vertex reachable within `max_hops`, the start
    /// vertex excluded.
    async fn traverse(
        &self,
        start: i64,
        max_hops: u32,
        edge_label: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Vertex>>;

    // Versioning primitives.

    async fn current_version(&self, label: &str, fhir_id: &str) -> Result<Option<Vertex>>;
    async fn version(&self, label: &str, fhir_id: &str, version_id: &str)
        -> Result<Option<Vertex>>;
    /// All versions, newest first (`lastUpdated` descending, `versionId`
    /// descending as tie-break), clipped to `limit`.
    async fn version_history(
        &self,
        label: &str,
        fhir_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Vertex>>;
    /// All versions of all resources of a type, newest first; `since` keeps
    /// only versions strictly after the given instant.
    async fn type_history(
        &self,
        label: &str,
        limit: Option<usize>,
        since: Option<&str>,
    ) -> Result<Vec<Vertex>>;
    /// Highest existing version number plus one; 1 when none exist.
    async fn next_version_number(&self, label: &str, fhir_id: &str) -> Result<i64>;
    async fn mark_version_non_current(&self, label: &str, fhir_id: &str) -> Result<bool>;
    async fn create_supersedes_edge(&self, newer: i64, older: i64) -> Result<()>;
    /// Allocate the next version number, demote the previous current
    /// version, write the new version vertex (reusing a placeholder vertex
    /// for version 1), and link it to its predecessor. Returns
    /// `(graph id, version number)`.
    async fn create_versioned_vertex(
        &self,
        label: &str,
        fhir_id: &str,
        props: PropMap,
    ) -> Result<(i64, i64)>;
    /// Same flow with `isDeleted=true` and no body. `None` when the
    /// resource has no current version.
    async fn create_tombstone(&self, label: &str, fhir_id: &str) -> Result<Option<(i64, i64)>>;
    async fn delete_all_versions(&self, label: &str, fhir_id: &str) -> Result<i64>;
    async fn delete_version(&self, label: &str, fhir_id: &str, version_id: &str) -> Result<bool>;
}
