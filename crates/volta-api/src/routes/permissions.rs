//! Capability-flag routes.
//!
//! Each route answers "what can the caller do to this resource" with the
//! same flags the access model evaluates internally, so clients can shape
//! their UI without replaying the threshold logic.
//!
//! ## Routes
//!
//! - `GET /labs/{id}/permissions`
//! - `GET /teams/{id}/permissions`
//! - `GET /files/{id}/permissions`
//! - `GET /mappings/{id}/permissions`
//! - `GET /monitored_paths/{id}/permissions`

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use volta_catalog::access::{self, Resource};
use volta_core::{FileId, LabId, MappingId, MonitoredPathId, TeamId};

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::server::AppState;

/// Capability flags for one resource.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PermissionsResponse {
    /// Whether the caller may read the resource.
    pub read: bool,
    /// Whether the caller may edit the resource.
    pub write: bool,
    /// Whether the caller may create resources of this kind.
    pub create: bool,
    /// Whether the caller may delete the resource.
    pub destroy: bool,
}

/// Creates permission routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/labs/:id/permissions", get(lab_permissions))
        .route("/teams/:id/permissions", get(team_permissions))
        .route("/files/:id/permissions", get(file_permissions))
        .route("/mappings/:id/permissions", get(mapping_permissions))
        .route(
            "/monitored_paths/:id/permissions",
            get(monitored_path_permissions),
        )
}

async fn resource_permissions(
    ctx: &RequestContext,
    state: &Arc<AppState>,
    resource: Resource,
) -> Result<Json<PermissionsResponse>, ApiError> {
    let flags = state
        .store
        .read(|catalog| access::permissions(catalog, &ctx.principal, resource))?;
    Ok(Json(PermissionsResponse {
        read: flags.read,
        write: flags.write,
        create: flags.create,
        destroy: flags.destroy,
    }))
}

/// Capability flags on a lab.
///
/// GET /labs/{id}/permissions
#[utoipa::path(
    get,
    path = "/labs/{id}/permissions",
    tag = "permissions",
    params(("id" = Uuid, Path, description = "Lab ID")),
    responses(
        (status = 200, description = "Capability flags", body = PermissionsResponse),
        (status = 404, description = "Not found", body = crate::error::ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn lab_permissions(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    resource_permissions(&ctx, &state, Resource::Lab(LabId::from_uuid(id))).await
}

/// Capability flags on a team.
///
/// GET /teams/{id}/permissions
#[utoipa::path(
    get,
    path = "/teams/{id}/permissions",
    tag = "permissions",
    params(("id" = Uuid, Path, description = "Team ID")),
    responses(
        (status = 200, description = "Capability flags", body = PermissionsResponse),
        (status = 404, description = "Not found", body = crate::error::ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn team_permissions(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    resource_permissions(&ctx, &state, Resource::Team(TeamId::from_uuid(id))).await
}

/// Capability flags on an observed file.
///
/// GET /files/{id}/permissions
#[utoipa::path(
    get,
    path = "/files/{id}/permissions",
    tag = "permissions",
    params(("id" = Uuid, Path, description = "File ID")),
    responses(
        (status = 200, description = "Capability flags", body = PermissionsResponse),
        (status = 404, description = "Not found", body = crate::error::ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn file_permissions(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    resource_permissions(&ctx, &state, Resource::File(FileId::from_uuid(id))).await
}

/// Capability flags on a mapping.
///
/// GET /mappings/{id}/permissions
#[utoipa::path(
    get,
    path = "/mappings/{id}/permissions",
    tag = "permissions",
    params(("id" = Uuid, Path, description = "Mapping ID")),
    responses(
        (status = 200, description = "Capability flags", body = PermissionsResponse),
        (status = 404, description = "Not found", body = crate::error::ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn mapping_permissions(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    resource_permissions(&ctx, &state, Resource::Mapping(MappingId::from_uuid(id))).await
}

/// Capability flags on a monitored path.
///
/// GET /monitored_paths/{id}/permissions
#[utoipa::path(
    get,
    path = "/monitored_paths/{id}/permissions",
    tag = "permissions",
    params(("id" = Uuid, Path, description = "Monitored path ID")),
    responses(
        (status = 200, description = "Capability flags", body = PermissionsResponse),
        (status = 404, description = "Not found", body = crate::error::ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn monitored_path_permissions(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    resource_permissions(
        &ctx,
        &state,
        Resource::MonitoredPath(MonitoredPathId::from_uuid(id)),
    )
    .await
}
