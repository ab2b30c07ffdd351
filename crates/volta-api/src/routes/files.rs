//! Observed-file routes: direct uploads, lookup, mapping assignment.
//!
//! ## Routes
//!
//! - `POST /files` - Direct upload (multipart; resumable)
//! - `GET  /files/{id}` - Get an observed file
//! - `POST /files/{id}/mapping` - Assign a column mapping
//! - `GET  /monitored_paths/{id}/files` - Files matched by a monitored path

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use volta_catalog::access::{self, Resource};
use volta_catalog::entities::ObservedFileRow;
use volta_catalog::upload::UploadRequest;
use volta_catalog::{mapping, Catalog};
use volta_core::{AccessKind, FileId, MappingId, MonitoredPathId, TeamId};

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::server::AppState;

/// An observed file.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FileResponse {
    /// File ID.
    pub id: String,
    /// Owning team ID.
    pub team_id: String,
    /// Reporting harvester ID, absent for direct uploads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub harvester_id: Option<String>,
    /// Uploading user ID, absent for harvester files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    /// Normalized path, or the upload's display name.
    pub path: String,
    /// Monitored paths whose pattern matched this file.
    pub monitored_path_ids: Vec<String>,
    /// Current import state.
    pub state: String,
    /// Assigned column mapping, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping_id: Option<String>,
    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Parser the harvester used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parser: Option<String>,
    /// Total rows, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_rows: Option<u64>,
    /// Partitions announced for the import, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_partitions: Option<u64>,
    /// Committed parquet partitions.
    pub partitions: u32,
    /// Whether a PNG preview has been stored.
    pub preview_uploaded: bool,
    /// Errors recorded by failed imports.
    pub import_errors: Vec<String>,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
}

impl FileResponse {
    fn from_row(catalog: &Catalog, row: &ObservedFileRow) -> Self {
        let partitions = catalog
            .partitions_of(row.id)
            .iter()
            .filter(|p| p.uploaded)
            .count();
        Self {
            id: row.id.to_string(),
            team_id: row.team_id.to_string(),
            harvester_id: row.harvester_id.map(|id| id.to_string()),
            uploader: row.uploader.map(|id| id.to_string()),
            path: row.path.clone(),
            monitored_path_ids: row
                .monitored_path_ids
                .iter()
                .map(ToString::to_string)
                .collect(),
            state: row.state.to_string(),
            mapping_id: row.mapping_id.map(|id| id.to_string()),
            name: row.name.clone(),
            parser: row.parser.clone(),
            num_rows: row.num_rows,
            num_partitions: row.num_partitions,
            partitions: u32::try_from(partitions).unwrap_or(u32::MAX),
            preview_uploaded: row.preview_uploaded,
            import_errors: row.import_errors.clone(),
            created_at: row.created_at.to_rfc3339(),
        }
    }
}

/// Result of a direct upload.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    /// Created or resumed file.
    pub file_id: String,
    /// File state after the upload.
    pub state: String,
    /// Partitions written by this request.
    pub partitions: u32,
}

/// Request to assign a mapping to a file.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AssignMappingRequest {
    /// Mapping to import the file with.
    pub mapping_id: Uuid,
}

/// Files matched by a monitored path.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListFilesResponse {
    /// Matched files readable by the caller.
    pub files: Vec<FileResponse>,
}

/// Creates file routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/files", post(upload_file))
        .route("/files/:id", get(get_file))
        .route("/files/:id/mapping", post(assign_mapping))
        .route("/monitored_paths/:id/files", get(list_path_files))
}

/// Direct upload of a tabular file.
///
/// POST /files
///
/// A failed import is still a 200: the response carries the file in its
/// `IMPORT FAILED` state with the cause recorded on the file.
#[utoipa::path(
    post,
    path = "/files",
    tag = "files",
    request_body(content = String, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Upload accepted; `state` reports whether the import succeeded", body = UploadResponse),
        (status = 400, description = "Bad request", body = crate::error::ApiErrorBody),
        (status = 403, description = "Forbidden", body = crate::error::ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn upload_file(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let request = parse_upload(multipart).await?;
    tracing::info!(name = %request.name, team = %request.team_id, "direct upload");

    let outcome = state.upload.upload(&ctx.principal, request).await?;
    Ok(Json(UploadResponse {
        file_id: outcome.file_id.to_string(),
        state: outcome.state.to_string(),
        partitions: outcome.partitions,
    }))
}

/// Get an observed file.
///
/// GET /files/{id}
#[utoipa::path(
    get,
    path = "/files/{id}",
    tag = "files",
    params(("id" = Uuid, Path, description = "File ID")),
    responses(
        (status = 200, description = "File", body = FileResponse),
        (status = 403, description = "Forbidden", body = crate::error::ApiErrorBody),
        (status = 404, description = "Not found", body = crate::error::ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn get_file(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let file_id = FileId::from_uuid(id);
    let response = state.store.read(|catalog| {
        access::require_capability(
            catalog,
            &ctx.principal,
            Resource::File(file_id),
            AccessKind::Read,
        )?;
        Ok(FileResponse::from_row(catalog, catalog.file(file_id)?))
    })?;
    Ok(Json(response))
}

/// Assign a column mapping to a file awaiting one.
///
/// POST /files/{id}/mapping
#[utoipa::path(
    post,
    path = "/files/{id}/mapping",
    tag = "files",
    params(("id" = Uuid, Path, description = "File ID")),
    request_body = AssignMappingRequest,
    responses(
        (status = 200, description = "Mapping assigned", body = FileResponse),
        (status = 400, description = "Bad request", body = crate::error::ApiErrorBody),
        (status = 403, description = "Forbidden", body = crate::error::ApiErrorBody),
        (status = 404, description = "Not found", body = crate::error::ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn assign_mapping(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignMappingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let file_id = FileId::from_uuid(id);
    let mapping_id = MappingId::from_uuid(req.mapping_id);

    state.store.transaction(|catalog| {
        mapping::assign_to_file(catalog, &ctx.principal, file_id, mapping_id)
    })?;
    let response = state
        .store
        .read(|catalog| Ok(FileResponse::from_row(catalog, catalog.file(file_id)?)))?;
    Ok(Json(response))
}

/// List the files a monitored path has matched.
///
/// GET /monitored_paths/{id}/files
#[utoipa::path(
    get,
    path = "/monitored_paths/{id}/files",
    tag = "files",
    params(("id" = Uuid, Path, description = "Monitored path ID")),
    responses(
        (status = 200, description = "Matched files", body = ListFilesResponse),
        (status = 403, description = "Forbidden", body = crate::error::ApiErrorBody),
        (status = 404, description = "Not found", body = crate::error::ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn list_path_files(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let path_id = MonitoredPathId::from_uuid(id);
    let files = state.store.read(|catalog| {
        access::require_capability(
            catalog,
            &ctx.principal,
            Resource::MonitoredPath(path_id),
            AccessKind::Read,
        )?;
        catalog.monitored_path(path_id)?;

        let mut files = Vec::new();
        for row in catalog.files.values() {
            if !row.monitored_path_ids.contains(&path_id) {
                continue;
            }
            // Unreadable files are omitted rather than erroring the listing.
            if access::capability(
                catalog,
                &ctx.principal,
                Resource::File(row.id),
                AccessKind::Read,
            )? {
                files.push(FileResponse::from_row(catalog, row));
            }
        }
        Ok(files)
    })?;
    Ok(Json(ListFilesResponse { files }))
}

/// Pulls an [`UploadRequest`] out of a multipart body.
async fn parse_upload(mut multipart: Multipart) -> Result<UploadRequest, ApiError> {
    let mut name: Option<String> = None;
    let mut team_id: Option<TeamId> = None;
    let mut mapping_id: Option<MappingId> = None;
    let mut target_file_id: Option<FileId> = None;
    let mut payload: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart field: {e}")))?
    {
        let Some(field_name) = field.name().map(str::to_string) else {
            continue;
        };
        match field_name.as_str() {
            "file" => {
                payload = Some(field.bytes().await.map_err(|e| {
                    ApiError::bad_request(format!("unreadable file field: {e}"))
                })?);
            }
            "name" => name = Some(text_field(field).await?),
            "team_id" => team_id = Some(TeamId::from_uuid(uuid_field(field).await?)),
            "mapping_id" => mapping_id = Some(MappingId::from_uuid(uuid_field(field).await?)),
            "target_file_id" => {
                target_file_id = Some(FileId::from_uuid(uuid_field(field).await?));
            }
            _ => {}
        }
    }

    let payload =
        payload.ok_or_else(|| ApiError::bad_request("multipart body is missing a file field"))?;
    let name = name.ok_or_else(|| ApiError::bad_request("multipart body is missing a name"))?;
    let team_id =
        team_id.ok_or_else(|| ApiError::bad_request("multipart body is missing a team_id"))?;

    Ok(UploadRequest {
        name,
        team_id,
        mapping_id,
        target_file_id,
        payload,
    })
}

async fn text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(format!("unreadable text field: {e}")))
}

async fn uuid_field(field: axum::extract::multipart::Field<'_>) -> Result<Uuid, ApiError> {
    let text = text_field(field).await?;
    text.parse()
        .map_err(|e| ApiError::bad_request(format!("'{text}' is not a valid UUID: {e}")))
}
