//! Non-versioned resource persistence over the graph store.
//!
//! One vertex per `(resourceType, id)`, replaced in place on re-write. This
//! is the path behind the `/graph` endpoints; the FHIR endpoints run the
//! versioned path in [`crate::versioning`].

use serde_json::Value;

use graphir_core::{identifier_values, GraphirError, Result, SchemaValidator};
use graphir_store::materializer;
use graphir_store::{prop, GraphStore, PropMap, Vertex};

pub struct GraphPersistence<'a> {
    graph: &'a dyn GraphStore,
    validator: &'a SchemaValidator,
}

#[derive(Debug)]
pub struct PersistOutcome {
    pub graph_id: i64,
    pub resource_type: String,
    pub fhir_id: Option<String>,
    pub materialized: usize,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub graph_id: i64,
    pub resource_type: String,
    pub fhir_id: Option<String>,
    pub json: Option<String>,
    pub is_placeholder: bool,
    pub version_id: Option<String>,
    pub last_updated: Option<String>,
}

pub(crate) fn backend(e: graphir_store::StoreError) -> GraphirError {
    GraphirError::Backend(e.to_string())
}

impl<'a> GraphPersistence<'a> {
    pub fn new(graph: &'a dyn GraphStore, validator: &'a SchemaValidator) -> Self {
        Self { graph, validator }
    }

    /// Validate a resource body and upsert its vertex. With an id the write
    /// keys on `(label, id)` — upgrading a placeholder vertex if one is
    /// waiting — otherwise an anonymous vertex is added.
    pub async fn validate_and_persist(
        &self,
        body: &Value,
        materialize_refs: bool,
        allow_placeholders: bool,
    ) -> Result<PersistOutcome> {
        let (resource_type, fhir_id) = self
            .validator
            .extract_resource_info(body)
            .map_err(GraphirError::Validation)?;
        self.validator
            .validate(body)
            .map_err(GraphirError::Validation)?;

        let json_text = serde_json::to_string(body)?;

        let mut props = PropMap::new();
        props.insert(
            prop::RESOURCE_TYPE.to_string(),
            Value::String(resource_type.clone()),
        );
        props.insert(prop::JSON.to_string(), Value::String(json_text));
        props.insert(prop::IS_CURRENT.to_string(), Value::Bool(true));
        props.insert(prop::IS_DELETED.to_string(), Value::Bool(false));
        props.insert(prop::IS_PLACEHOLDER.to_string(), Value::Bool(false));
        let identifiers = identifier_values(body);
        if !identifiers.is_empty() {
            props.insert(
                prop::IDENTIFIER.to_string(),
                Value::Array(identifiers.into_iter().map(Value::String).collect()),
            );
        }

        let graph_id = match &fhir_id {
            Some(id) => {
                props.insert(prop::ID.to_string(), Value::String(id.clone()));
                self.graph
                    .upsert_vertex_by_property(&resource_type, prop::ID, id, props)
                    .await
                    .map_err(backend)?
            }
            None => self
                .graph
                .add_vertex_returning_id(&resource_type, props)
                .await
                .map_err(backend)?,
        };

        let materialized = if materialize_refs {
            materializer::materialize(self.graph, graph_id, body, allow_placeholders).await
        } else {
            0
        };

        Ok(PersistOutcome {
            graph_id,
            resource_type,
            fhir_id,
            materialized,
        })
    }

    /// Locate the vertex behind `(resourceType, id)`, preferring the current
    /// version when the resource also lives on the versioned path.
    pub async fn find_vertex(&self, resource_type: &str, id: &str) -> Result<Option<Vertex>> {
        if let Some(current) = self
            .graph
            .current_version(resource_type, id)
            .await
            .map_err(backend)?
        {
            return Ok(Some(current));
        }
        self.graph
            .vertex_by_label_and_property(resource_type, prop::ID, id)
            .await
            .map_err(backend)
    }

    /// Raw stored JSON for `(resourceType, id)`.
    pub async fn get(&self, resource_type: &str, id: &str) -> Result<Option<String>> {
        let vertex = self.find_vertex(resource_type, id).await?;
        Ok(vertex.and_then(|v| v.prop_str(prop::JSON).map(|s| s.to_string())))
    }

    /// Hard delete: the vertex is dropped, incident edges with it.
    pub async fn delete(&self, resource_type: &str, id: &str) -> Result<bool> {
        match self.find_vertex(resource_type, id).await? {
            Some(vertex) => self.graph.delete_vertex(vertex.id).await.map_err(backend),
            None => Ok(false),
        }
    }

    /// Label-scoped equality search. Returns a page plus the total count.
    pub async fn search(
        &self,
        resource_type: &str,
        filters: &[(String, String)],
        limit: Option<usize>,
        offset: usize,
    ) -> Result<(Vec<SearchResult>, i64)> {
        let vertices = self
            .graph
            .vertices_by_label(resource_type, filters, limit, offset)
            .await
            .map_err(backend)?;
        let total = self
            .graph
            .count_vertices_by_label(resource_type, filters)
            .await
            .map_err(backend)?;
        Ok((vertices.into_iter().map(to_search_result).collect(), total))
    }

    /// Search across several resource types, or across every supported type
    /// when none are given. Results are clipped to `limit` after
    /// accumulation; the total is the sum of per-type counts.
    pub async fn search_all_types(
        &self,
        resource_types: Option<&[String]>,
        filters: &[(String, String)],
        limit: Option<usize>,
    ) -> Result<(Vec<SearchResult>, i64)> {
        let supported = self.validator.supported_types();
        let types: Vec<&String> = match resource_types {
            Some(types) => types.iter().collect(),
            None => supported.iter().collect(),
        };

        let mut results = Vec::new();
        let mut total = 0;
        for resource_type in types {
            let (mut page, count) = self.search(resource_type, filters, limit, 0).await?;
            total += count;
            results.append(&mut page);
        }
        if let Some(limit) = limit {
            results.truncate(limit);
        }
        Ok((results, total))
    }
}

pub(crate) fn to_search_result(vertex: Vertex) -> SearchResult {
    SearchResult {
        graph_id: vertex.id,
        resource_type: vertex.label.clone(),
        fhir_id: vertex.prop_str(prop::ID).map(|s| s.to_string()),
        json: vertex.prop_str(prop::JSON).map(|s| s.to_string()),
        is_placeholder: vertex.prop_bool(prop::IS_PLACEHOLDER),
        version_id: vertex.prop_str(prop::VERSION_ID).map(|s| s.to_string()),
        last_updated: vertex.prop_str(prop::LAST_UPDATED).map(|s| s.to_string()),
    }
}
