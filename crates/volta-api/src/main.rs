//! Volta API server binary.

use std::sync::Arc;

use volta_api::config::Config;
use volta_api::server::{AppState, Server};
use volta_catalog::store::{Catalog, CatalogStore};
use volta_core::observability::{init_logging, LogFormat};
use volta_core::{LocalDiskBackend, MemoryBackend, StorageBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let format = if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    };
    init_logging(format);
    volta_catalog::metrics::register_metrics();

    let storage: Arc<dyn StorageBackend> = match config.storage_root.as_deref() {
        Some(root) => Arc::new(LocalDiskBackend::new(root)),
        None => {
            // Config::from_env only allows this in debug mode.
            tracing::warn!("no storage root configured; artifacts are held in memory");
            Arc::new(MemoryBackend::new())
        }
    };

    let catalog = match config.catalog_snapshot.as_deref() {
        Some(path) => {
            let json = tokio::fs::read(path).await?;
            let catalog: Catalog = serde_json::from_slice(&json)?;
            tracing::info!(path, "seeded catalog from snapshot");
            catalog
        }
        None => Catalog::default(),
    };
    catalog.validate()?;
    let store = Arc::new(CatalogStore::with_catalog(catalog));

    tracing::info!(
        port = config.http_port,
        debug = config.debug,
        "starting volta-api"
    );
    Server::new(AppState::new(config, store, storage)).serve().await?;
    Ok(())
}
