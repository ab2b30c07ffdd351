//! API server implementation.
//!
//! Provides health, ready, and API endpoints for the Volta platform.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use volta_catalog::ingest::{IngestConfig, IngestService};
use volta_catalog::store::CatalogStore;
use volta_catalog::upload::{UploadConfig, UploadService};
use volta_core::{Result, StorageBackend};

use crate::config::Config;
use crate::openapi;
use crate::routes;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ReadyResponse {
    /// Service readiness status.
    pub ready: bool,
    /// Optional message about readiness state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Shared application state for all request handlers.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Catalog snapshot store.
    pub store: Arc<CatalogStore>,
    /// Artifact storage backend.
    pub storage: Arc<dyn StorageBackend>,
    /// Harvester report ingestion.
    pub ingest: IngestService,
    /// Direct-upload pipeline.
    pub upload: UploadService,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("storage", &"<StorageBackend>")
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Creates application state over the given store and backend.
    #[must_use]
    pub fn new(config: Config, store: Arc<CatalogStore>, storage: Arc<dyn StorageBackend>) -> Self {
        let ingest = IngestService::new(
            Arc::clone(&store),
            Arc::clone(&storage),
            IngestConfig {
                max_preview_bytes: config.max_preview_bytes,
            },
        );
        let upload = UploadService::new(
            Arc::clone(&store),
            Arc::clone(&storage),
            UploadConfig {
                max_partition_rows: config.max_partition_rows,
                max_preview_bytes: config.max_preview_bytes,
            },
        );
        Self {
            config,
            store,
            storage,
            ingest,
            upload,
        }
    }
}

/// Health check endpoint handler.
///
/// Returns 200 OK if the service is alive. This is a shallow check
/// that doesn't verify dependencies.
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness check endpoint handler.
///
/// Returns 200 OK when the artifact backend is reachable. A `head` on a
/// missing key is enough to validate credentials and the network path.
async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let check_key = "__volta/ready-check";
    match state.storage.head(check_key).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                message: Some(format!("storage check failed: {e}")),
            }),
        ),
    }
}

/// Serves the generated `OpenAPI` document.
async fn openapi_json() -> impl IntoResponse {
    Json(openapi::openapi())
}

/// Builds the full application router.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(state.config.max_upload_bytes).unwrap_or(usize::MAX);
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/openapi.json", get(openapi_json))
        .merge(routes::api_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The HTTP server.
pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    /// Creates a server over prepared application state.
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Binds the configured port and serves until the task is aborted.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn serve(self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let app = router(Arc::clone(&self.state));

        tracing::info!(%addr, "volta-api listening");
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| volta_core::Error::internal(format!("failed to bind {addr}: {e}")))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| volta_core::Error::internal(format!("server error: {e}")))
    }
}
