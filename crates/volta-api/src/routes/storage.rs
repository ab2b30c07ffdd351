//! Storage-status routes.
//!
//! ## Routes
//!
//! - `GET /labs/{id}/storage_types` - A lab's storage types with usage
//! - `GET /storage_types/{id}/usage` - Usage of one storage type

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use volta_catalog::access::{self, Resource};
use volta_catalog::allocator;
use volta_catalog::entities::{StorageKind, StorageTypeRow};
use volta_catalog::Catalog;
use volta_core::{AccessKind, LabId, StorageTypeId};

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::server::AppState;

/// A storage type with its computed usage.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StorageTypeResponse {
    /// Storage type ID.
    pub id: String,
    /// Owning lab ID.
    pub lab_id: String,
    /// Storage type name.
    pub name: String,
    /// Backend kind: `managed` or `external_s3`.
    pub kind: String,
    /// Hard byte budget.
    pub quota_bytes: u64,
    /// Bytes currently reserved, summed on demand.
    pub used_bytes: u64,
    /// Allocation order; lower is tried first.
    pub priority: i16,
    /// Whether the allocator may pick this storage type.
    pub enabled: bool,
}

impl StorageTypeResponse {
    fn from_row(catalog: &Catalog, row: &StorageTypeRow) -> Self {
        Self {
            id: row.id.to_string(),
            lab_id: row.lab_id.to_string(),
            name: row.name.clone(),
            kind: match row.kind {
                StorageKind::Managed => "managed".to_string(),
                StorageKind::ExternalS3 { .. } => "external_s3".to_string(),
            },
            quota_bytes: row.quota_bytes,
            used_bytes: allocator::used_bytes(catalog, row.id),
            priority: row.priority,
            enabled: row.enabled,
        }
    }
}

/// A lab's storage types in allocation order.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListStorageTypesResponse {
    /// Storage types, lowest priority first.
    pub storage_types: Vec<StorageTypeResponse>,
}

/// Usage detail of one storage type.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StorageUsageResponse {
    /// Storage type ID.
    pub id: String,
    /// Hard byte budget.
    pub quota_bytes: u64,
    /// Bytes currently reserved.
    pub used_bytes: u64,
    /// Bytes still available.
    pub available_bytes: u64,
}

/// Creates storage routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/labs/:id/storage_types", get(list_storage_types))
        .route("/storage_types/:id/usage", get(get_usage))
}

/// List a lab's storage types with usage, in allocation order.
///
/// GET /labs/{id}/storage_types
#[utoipa::path(
    get,
    path = "/labs/{id}/storage_types",
    tag = "storage",
    params(("id" = Uuid, Path, description = "Lab ID")),
    responses(
        (status = 200, description = "Storage types", body = ListStorageTypesResponse),
        (status = 403, description = "Forbidden", body = crate::error::ApiErrorBody),
        (status = 404, description = "Not found", body = crate::error::ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn list_storage_types(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let lab_id = LabId::from_uuid(id);
    let storage_types = state.store.read(|catalog| {
        access::require_capability(
            catalog,
            &ctx.principal,
            Resource::Lab(lab_id),
            AccessKind::Read,
        )?;
        catalog.lab(lab_id)?;
        Ok(allocator::storage_types_for_lab(catalog, lab_id)
            .into_iter()
            .map(|row| StorageTypeResponse::from_row(catalog, row))
            .collect::<Vec<_>>())
    })?;
    Ok(Json(ListStorageTypesResponse { storage_types }))
}

/// Get the usage of one storage type.
///
/// GET /storage_types/{id}/usage
#[utoipa::path(
    get,
    path = "/storage_types/{id}/usage",
    tag = "storage",
    params(("id" = Uuid, Path, description = "Storage type ID")),
    responses(
        (status = 200, description = "Usage", body = StorageUsageResponse),
        (status = 403, description = "Forbidden", body = crate::error::ApiErrorBody),
        (status = 404, description = "Not found", body = crate::error::ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn get_usage(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let storage_type_id = StorageTypeId::from_uuid(id);
    let response = state.store.read(|catalog| {
        access::require_capability(
            catalog,
            &ctx.principal,
            Resource::StorageType(storage_type_id),
            AccessKind::Read,
        )?;
        let row = catalog.storage_type(storage_type_id)?;
        let used = allocator::used_bytes(catalog, storage_type_id);
        Ok(StorageUsageResponse {
            id: row.id.to_string(),
            quota_bytes: row.quota_bytes,
            used_bytes: used,
            available_bytes: row.quota_bytes.saturating_sub(used),
        })
    })?;
    Ok(Json(response))
}
