//! graphir server entry point

use std::sync::Arc;

use graphir_core::SchemaValidator;
use graphir_store::SqliteGraph;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use graphir_server::{build_router, config::ServerConfig, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting graphir server...");

    let config = ServerConfig::load(
        std::path::Path::new("config.yaml")
            .exists()
            .then_some("config.yaml"),
    )
    .unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        ServerConfig::default()
    });

    if let Err(e) = std::fs::create_dir_all(&config.storage.data_dir) {
        tracing::error!("Failed to create data directory: {}", e);
        std::process::exit(1);
    }

    let graph = SqliteGraph::open(config.graph_db_path()).unwrap_or_else(|e| {
        tracing::error!("Failed to open graph store: {}", e);
        std::process::exit(1);
    });

    // Without a schema the server still answers reads; every write fails
    // with a schema-not-loaded validation error.
    let validator = match SchemaValidator::load(&config.fhir.schema_path) {
        Ok(validator) => {
            tracing::info!(
                "FHIR schema loaded: {} resource types",
                validator.supported_types().len()
            );
            validator
        }
        Err(e) => {
            tracing::warn!(
                "FHIR schema not loaded from {}: {}",
                config.fhir.schema_path.display(),
                e
            );
            SchemaValidator::unloaded()
        }
    };

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let base_path = config.fhir.base_path.clone();

    let state = Arc::new(AppState::new(Arc::new(graph), validator, config));
    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Listening on http://{}{}", bind_addr, base_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Server error: {}", e);
        });

    tracing::info!("Server shut down gracefully");
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
