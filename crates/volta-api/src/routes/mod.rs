//! HTTP route handlers.

pub mod files;
pub mod mappings;
pub mod permissions;
pub mod report;
pub mod storage;

use std::sync::Arc;

use axum::Router;

use crate::server::AppState;

/// All API routes.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(report::routes())
        .merge(files::routes())
        .merge(mappings::routes())
        .merge(storage::routes())
        .merge(permissions::routes())
}
