//! graphir - FHIR R6 RESTful resource server over a property graph
//!
//! Clinical resources are stored as labeled vertices; `reference` fields in
//! resource bodies become typed edges, so referrer lookups and compartment
//! traversal are answered by the graph instead of by reparsing JSON.

pub mod bundle;
pub mod conditional;
pub mod config;
pub mod handlers;
pub mod persist;
pub mod versioning;

use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use graphir_core::SchemaValidator;
use graphir_store::GraphStore;

use crate::config::ServerConfig;
use crate::persist::GraphPersistence;
use crate::versioning::{VersionedStore, WriteLocks};

/// Application state
pub struct AppState {
    pub graph: Arc<dyn GraphStore>,
    pub validator: SchemaValidator,
    pub config: ServerConfig,
    /// Per-(resourceType, id) write locks serializing versioned writes.
    pub write_locks: WriteLocks,
}

impl AppState {
    pub fn new(graph: Arc<dyn GraphStore>, validator: SchemaValidator, config: ServerConfig) -> Self {
        Self {
            graph,
            validator,
            config,
            write_locks: WriteLocks::default(),
        }
    }

    /// The versioned resource layer behind the FHIR endpoints.
    pub fn versioned(&self) -> VersionedStore<'_> {
        VersionedStore::new(self.graph.as_ref(), &self.validator, &self.write_locks)
    }

    /// The non-versioned resource layer behind the graph endpoints.
    pub fn persistence(&self) -> GraphPersistence<'_> {
        GraphPersistence::new(self.graph.as_ref(), &self.validator)
    }

    /// Base URL of the FHIR endpoints, used in Location headers and links.
    pub fn fhir_base_url(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.config.server.host, self.config.server.port, self.config.fhir.base_path
        )
    }
}

/// Build the application router with all routes and middleware
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let fhir = Router::new()
        // Metadata + system-level endpoints
        .route("/metadata", get(handlers::metadata::capability_statement))
        .route("/_history", get(handlers::history::system_history))
        .route("/_search", get(handlers::search::search_all_types))
        // Bundle processing at the base
        .route("/", post(bundle::process_bundle))
        // Operations (must be before /{resource_type}/{id} to avoid matching as {id})
        .route("/{resource_type}/$validate", post(handlers::validate::validate))
        .route(
            "/{resource_type}/{id}/$everything",
            get(handlers::everything::patient_everything),
        )
        // Type-level: search + create + conditional variants
        .route(
            "/{resource_type}",
            get(handlers::search::search)
                .post(handlers::crud::create)
                .put(handlers::conditional::conditional_update)
                .delete(handlers::conditional::conditional_delete)
                .patch(handlers::conditional::conditional_patch),
        )
        .route("/{resource_type}/_history", get(handlers::history::type_history))
        // Instance-level CRUD
        .route(
            "/{resource_type}/{id}",
            get(handlers::crud::read)
                .put(handlers::crud::update)
                .patch(handlers::crud::patch_resource)
                .delete(handlers::crud::delete_resource),
        )
        // History
        .route(
            "/{resource_type}/{id}/_history",
            get(handlers::history::instance_history),
        )
        .route(
            "/{resource_type}/{id}/_history/{vid}",
            get(handlers::history::vread),
        );

    let base_path = state.config.fhir.base_path.clone();

    Router::new()
        .route("/health", get(handlers::metadata::health_check))
        // Graph surface (non-versioned persistence + introspection)
        .route(
            "/graph",
            post(handlers::graph::create_resource).delete(handlers::graph::wipe),
        )
        .route("/graph/count", get(handlers::graph::count))
        .route(
            "/graph/{resource_type}/{id}",
            get(handlers::graph::read_resource).delete(handlers::graph::delete_resource),
        )
        .route(
            "/graph/{resource_type}/{id}/references",
            get(handlers::graph::references),
        )
        .nest(&base_path, fhir)
        // Middleware
        .layer(RequestBodyLimitLayer::new(16 * 1024 * 1024)) // 16MB
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
