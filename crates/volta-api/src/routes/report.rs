//! Harvester report endpoint.
//!
//! ## Routes
//!
//! - `POST /report` - Submit a harvester report (JSON, or multipart when
//!   the report carries a parquet or PNG payload)

use std::sync::Arc;

use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use volta_catalog::ingest::{HarvesterReport, IngestOutcome};

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::server::AppState;

/// Multipart field names a harvester may attach a payload under.
const ATTACHMENT_FIELDS: [&str; 2] = ["parquet_file", "png_file"];

/// Outcome of a processed report.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReportResponse {
    /// What the report resulted in: `error_recorded`, `file`, or `partition`.
    pub outcome: String,
    /// Affected file, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    /// File state after the report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Committed partition, for `partition` outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<String>,
    /// Partition number, for `partition` outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_number: Option<u32>,
    /// Recorded harvest error, for `error_recorded` outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_id: Option<String>,
}

impl From<IngestOutcome> for ReportResponse {
    fn from(outcome: IngestOutcome) -> Self {
        match outcome {
            IngestOutcome::ErrorRecorded { error_id, file_id } => Self {
                outcome: "error_recorded".to_string(),
                file_id: file_id.map(|id| id.to_string()),
                state: None,
                partition_id: None,
                partition_number: None,
                error_id: Some(error_id.to_string()),
            },
            IngestOutcome::File { file_id, state } => Self {
                outcome: "file".to_string(),
                file_id: Some(file_id.to_string()),
                state: Some(state.to_string()),
                partition_id: None,
                partition_number: None,
                error_id: None,
            },
            IngestOutcome::Partition {
                file_id,
                partition_id,
                partition_number,
                state,
            } => Self {
                outcome: "partition".to_string(),
                file_id: Some(file_id.to_string()),
                state: Some(state.to_string()),
                partition_id: Some(partition_id.to_string()),
                partition_number: Some(partition_number),
                error_id: None,
            },
        }
    }
}

/// Creates report routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/report", post(submit_report))
}

/// Submit a harvester report.
///
/// POST /report
#[utoipa::path(
    post,
    path = "/report",
    tag = "report",
    request_body = String,
    responses(
        (status = 200, description = "Report processed", body = ReportResponse),
        (status = 400, description = "Bad request", body = crate::error::ApiErrorBody),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorBody),
        (status = 507, description = "Insufficient storage", body = crate::error::ApiErrorBody),
    ),
    security(
        ("harvesterKey" = [])
    )
)]
pub(crate) async fn submit_report(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<impl IntoResponse, ApiError> {
    let api_key = ctx.require_harvester_key()?.to_string();

    let (report, attachment) = if is_multipart(&request) {
        parse_multipart(request, &state).await?
    } else {
        let bytes = axum::body::to_bytes(
            request.into_body(),
            usize::try_from(state.config.max_upload_bytes).unwrap_or(usize::MAX),
        )
        .await
        .map_err(|e| ApiError::bad_request(format!("failed to read report body: {e}")))?;
        let report: HarvesterReport = serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::bad_request(format!("malformed report: {e}")))?;
        (report, None)
    };

    let outcome = state.ingest.ingest(&api_key, report, attachment).await?;
    Ok(Json(ReportResponse::from(outcome)))
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"))
}

/// Pulls the report JSON and the optional payload out of a multipart body.
///
/// The report travels in a `report` field; the payload in `parquet_file`
/// or `png_file`, matching what harvesters send.
async fn parse_multipart(
    request: Request,
    state: &Arc<AppState>,
) -> Result<(HarvesterReport, Option<Bytes>), ApiError> {
    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?;

    let mut report: Option<HarvesterReport> = None;
    let mut attachment: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart field: {e}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == "report" {
            let text = field
                .text()
                .await
                .map_err(|e| ApiError::bad_request(format!("unreadable report field: {e}")))?;
            report = Some(
                serde_json::from_str(&text)
                    .map_err(|e| ApiError::bad_request(format!("malformed report: {e}")))?,
            );
        } else if ATTACHMENT_FIELDS.contains(&name.as_str()) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("unreadable payload field: {e}")))?;
            attachment = Some(bytes);
        }
    }

    let report =
        report.ok_or_else(|| ApiError::bad_request("multipart body is missing a report field"))?;
    Ok((report, attachment))
}
