//! Column-mapping routes.
//!
//! ## Routes
//!
//! - `POST  /mappings` - Create a mapping
//! - `GET   /mappings/{id}` - Get a mapping with derived validity
//! - `PATCH /mappings/{id}` - Replace a mapping's entries

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use volta_catalog::access::{self, Resource};
use volta_catalog::entities::{ColumnMappingRow, ColumnRule};
use volta_catalog::{mapping, Catalog};
use volta_core::{AccessKind, AccessThresholds, ColumnTypeId, Error, MappingId, TeamId};

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::server::AppState;

/// One mapping entry: raw column name to target type plus rescale.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MappingRuleBody {
    /// Target column type ID.
    pub column_type: Uuid,
    /// Output name override (forbidden for required column types).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
    /// Rescale multiplier (numeric types only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    /// Rescale addition (numeric types only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addition: Option<f64>,
}

impl From<MappingRuleBody> for ColumnRule {
    fn from(body: MappingRuleBody) -> Self {
        Self {
            column_type: ColumnTypeId::from_uuid(body.column_type),
            new_name: body.new_name,
            multiplier: body.multiplier,
            addition: body.addition,
        }
    }
}

impl From<&ColumnRule> for MappingRuleBody {
    fn from(rule: &ColumnRule) -> Self {
        Self {
            column_type: rule.column_type.as_uuid(),
            new_name: rule.new_name.clone(),
            multiplier: rule.multiplier,
            addition: rule.addition,
        }
    }
}

/// Request to create a mapping.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateMappingRequest {
    /// Mapping name.
    pub name: String,
    /// Owning team ID.
    pub team_id: Uuid,
    /// Entries keyed by raw column name.
    pub entries: BTreeMap<String, MappingRuleBody>,
}

/// Request to replace a mapping's entries.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateMappingRequest {
    /// Entries keyed by raw column name.
    pub entries: BTreeMap<String, MappingRuleBody>,
}

/// A mapping with its derived validity.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MappingResponse {
    /// Mapping ID.
    pub id: String,
    /// Owning team ID.
    pub team_id: String,
    /// Mapping name.
    pub name: String,
    /// Entries keyed by raw column name.
    pub entries: BTreeMap<String, MappingRuleBody>,
    /// Whether the mapping covers every required column type.
    pub is_valid: bool,
    /// Required column types the mapping does not cover.
    pub missing_required_columns: Vec<String>,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
}

impl MappingResponse {
    fn from_row(catalog: &Catalog, row: &ColumnMappingRow) -> Self {
        Self {
            id: row.id.to_string(),
            team_id: row.team_id.to_string(),
            name: row.name.clone(),
            entries: row
                .entries
                .iter()
                .map(|(name, rule)| (name.clone(), MappingRuleBody::from(rule)))
                .collect(),
            is_valid: mapping::is_valid(catalog, &row.entries),
            missing_required_columns: mapping::missing_required_columns(catalog, &row.entries),
            created_at: row.created_at.to_rfc3339(),
        }
    }
}

/// Creates mapping routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/mappings", post(create_mapping))
        .route("/mappings/:id", get(get_mapping).patch(update_mapping))
}

/// Create a column mapping.
///
/// POST /mappings
#[utoipa::path(
    post,
    path = "/mappings",
    tag = "mappings",
    request_body = CreateMappingRequest,
    responses(
        (status = 200, description = "Mapping created", body = MappingResponse),
        (status = 400, description = "Bad request", body = crate::error::ApiErrorBody),
        (status = 403, description = "Forbidden", body = crate::error::ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn create_mapping(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateMappingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let team_id = TeamId::from_uuid(req.team_id);
    let entries: BTreeMap<String, ColumnRule> = req
        .entries
        .into_iter()
        .map(|(name, body)| (name, ColumnRule::from(body)))
        .collect();

    let id = MappingId::generate();
    state.store.transaction(|catalog| {
        require_team_standing(catalog, &ctx, team_id)?;
        mapping::validate_entries(catalog, &entries)?;
        catalog.mappings.insert(
            id,
            ColumnMappingRow {
                id,
                team_id,
                name: req.name.clone(),
                entries: entries.clone(),
                thresholds: AccessThresholds::resource_default(),
                created_at: Utc::now(),
            },
        );
        Ok(())
    })?;

    let response = state
        .store
        .read(|catalog| Ok(MappingResponse::from_row(catalog, catalog.mapping(id)?)))?;
    Ok(Json(response))
}

/// Get a column mapping.
///
/// GET /mappings/{id}
#[utoipa::path(
    get,
    path = "/mappings/{id}",
    tag = "mappings",
    params(("id" = Uuid, Path, description = "Mapping ID")),
    responses(
        (status = 200, description = "Mapping", body = MappingResponse),
        (status = 403, description = "Forbidden", body = crate::error::ApiErrorBody),
        (status = 404, description = "Not found", body = crate::error::ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn get_mapping(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let mapping_id = MappingId::from_uuid(id);
    let response = state.store.read(|catalog| {
        access::require_capability(
            catalog,
            &ctx.principal,
            Resource::Mapping(mapping_id),
            AccessKind::Read,
        )?;
        Ok(MappingResponse::from_row(
            catalog,
            catalog.mapping(mapping_id)?,
        ))
    })?;
    Ok(Json(response))
}

/// Replace a mapping's entries.
///
/// PATCH /mappings/{id}
#[utoipa::path(
    patch,
    path = "/mappings/{id}",
    tag = "mappings",
    params(("id" = Uuid, Path, description = "Mapping ID")),
    request_body = UpdateMappingRequest,
    responses(
        (status = 200, description = "Mapping updated", body = MappingResponse),
        (status = 400, description = "Bad request", body = crate::error::ApiErrorBody),
        (status = 403, description = "Forbidden", body = crate::error::ApiErrorBody),
        (status = 404, description = "Not found", body = crate::error::ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn update_mapping(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateMappingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mapping_id = MappingId::from_uuid(id);
    let entries: BTreeMap<String, ColumnRule> = req
        .entries
        .into_iter()
        .map(|(name, body)| (name, ColumnRule::from(body)))
        .collect();

    state.store.transaction(|catalog| {
        mapping::update_entries(catalog, &ctx.principal, mapping_id, entries.clone())
    })?;

    let response = state.store.read(|catalog| {
        Ok(MappingResponse::from_row(
            catalog,
            catalog.mapping(mapping_id)?,
        ))
    })?;
    Ok(Json(response))
}

/// Creation requires standing in the owning team: service, team member or
/// admin, or admin of the team's lab.
fn require_team_standing(
    catalog: &Catalog,
    ctx: &RequestContext,
    team_id: TeamId,
) -> volta_core::Result<()> {
    let team = catalog.team(team_id)?;
    let scopes = access::scopes_for(catalog, &ctx.principal);
    if scopes.is_service
        || scopes.member_team_ids.contains(&team_id)
        || scopes.admin_team_ids.contains(&team_id)
        || scopes.admin_lab_ids.contains(&team.lab_id)
    {
        return Ok(());
    }
    Err(Error::forbidden(
        "mapping creation requires membership of the owning team",
    ))
}
