//! End-to-end exercises of the HTTP surface.
//!
//! Every test drives the real router with in-memory requests; nothing is
//! mocked below the handler layer.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use volta_api::config::Config;
use volta_api::server::{router, AppState};
use volta_catalog::ingest::DEFAULT_MAX_PREVIEW_BYTES;
use volta_catalog::store::CatalogStore;
use volta_catalog::testutil::{self, Fixture};
use volta_core::{MemoryBackend, StorageBackend};

const FILE_PATH: &str = "/data/cycler/run1.csv";
const CSV_PAYLOAD: &str = "time,Ewe,cycle\n0.0,3.70,1\n0.5,3.71,1\n1.0,3.72,2\n";
const BOUNDARY: &str = "volta-test-boundary";

struct Harness {
    fixture: Fixture,
    app: Router,
}

fn harness_with_quota(quota: u64) -> Harness {
    let mut fixture = Fixture::with_quota(quota);
    let catalog = std::mem::take(&mut fixture.catalog);
    let store = Arc::new(CatalogStore::with_catalog(catalog));
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let config = Config {
        debug: true,
        ..Config::default()
    };
    let app = router(Arc::new(AppState::new(config, store, storage)));
    Harness { fixture, app }
}

fn harness() -> Harness {
    harness_with_quota(10 * 1024 * 1024)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("request runs");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body reads");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("body is JSON")
    };
    (status, body)
}

fn json_request(method: &str, uri: &str, auth: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

fn get_request(uri: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::empty()).expect("request builds")
}

fn harvester_auth() -> String {
    format!("Harvester {}", testutil::HARVESTER_KEY)
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// Builds a multipart body from (name, filename, content) parts.
fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, content) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn multipart_request(uri: &str, auth: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, auth)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .expect("request builds")
}

fn success_report(content: Value) -> Value {
    json!({ "status": "success", "path": FILE_PATH, "content": content })
}

fn summary_json() -> Value {
    json!({
        "time": { "data_type": "float", "values": [0.0, 0.5, 1.0] },
        "Ewe": { "data_type": "float", "values": [3.70, 3.71, 3.72] },
    })
}

/// Drives a harvester file from discovery to AWAITING MAP ASSIGNMENT and
/// returns its id.
async fn drive_to_awaiting_map(h: &Harness) -> String {
    let (status, body) = send(
        &h.app,
        json_request(
            "POST",
            "/report",
            Some(&harvester_auth()),
            success_report(json!({ "task": "file_size", "size": 2048 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let file_id = body["file_id"].as_str().expect("file id").to_string();

    let (status, body) = send(
        &h.app,
        json_request(
            "POST",
            "/report",
            Some(&harvester_auth()),
            success_report(json!({
                "task": "import",
                "stage": "file_metadata",
                "data": { "name": "run1.csv", "parser": "biologic", "num_rows": 3 },
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["state"], "AWAITING MAP ASSIGNMENT");

    let (status, body) = send(
        &h.app,
        json_request(
            "POST",
            "/report",
            Some(&harvester_auth()),
            success_report(json!({
                "task": "import",
                "stage": "data_summary",
                "data": { "summary": summary_json(), "rows_seen": 3 },
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    file_id
}

#[tokio::test]
async fn harvester_protocol_imports_over_http() {
    let h = harness();
    let file_id = drive_to_awaiting_map(&h).await;

    // A team member assigns the fixture mapping.
    let (status, body) = send(
        &h.app,
        json_request(
            "POST",
            &format!("/files/{file_id}/mapping"),
            Some(&bearer(testutil::MEMBER_TOKEN)),
            json!({ "mapping_id": h.fixture.mapping_id.as_uuid() }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["state"], "IMPORTING");

    // The harvester ships one partition as multipart.
    let report = success_report(json!({
        "task": "import",
        "stage": "upload_parquet",
        "data": { "partition_number": 0, "partition_count": 1, "total_row_count": 3 },
    }))
    .to_string();
    let (status, body) = send(
        &h.app,
        multipart_request(
            "/report",
            &harvester_auth(),
            &[
                ("report", None, report.as_bytes()),
                ("parquet_file", Some("partition_0.parquet"), b"PAR1 not really"),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["outcome"], "partition");
    assert_eq!(body["partition_number"], 0);

    let completion = success_report(json!({
        "task": "import",
        "stage": "upload_complete",
        "data": { "successes": 1, "errors": {} },
    }));
    let (status, body) = send(
        &h.app,
        json_request("POST", "/report", Some(&harvester_auth()), completion.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["state"], "IMPORTED");

    // Resending the completion is an idempotent no-op.
    let (status, body) = send(
        &h.app,
        json_request("POST", "/report", Some(&harvester_auth()), completion),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["state"], "IMPORTED");

    // The file is visible to a team member with its partition count.
    let (status, body) = send(
        &h.app,
        get_request(
            &format!("/files/{file_id}"),
            Some(&bearer(testutil::MEMBER_TOKEN)),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["state"], "IMPORTED");
    assert_eq!(body["partitions"], 1);
    assert_eq!(body["num_rows"], 3);
}

#[tokio::test]
async fn reports_require_a_harvester_credential() {
    let h = harness();
    let report = success_report(json!({ "task": "file_size", "size": 1 }));

    let (status, _) = send(&h.app, json_request("POST", "/report", None, report.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A user bearer token is not a harvester credential.
    let (status, _) = send(
        &h.app,
        json_request(
            "POST",
            "/report",
            Some(&bearer(testutil::MEMBER_TOKEN)),
            report.clone(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &h.app,
        json_request("POST", "/report", Some("Harvester nope"), report),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn unknown_bearer_tokens_are_rejected() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        get_request("/files/00000000-0000-0000-0000-000000000000", Some("Bearer bogus")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "{body}");
}

#[tokio::test]
async fn unmatched_paths_are_rejected_with_400() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        json_request(
            "POST",
            "/report",
            Some(&harvester_auth()),
            json!({
                "status": "success",
                "path": "/elsewhere/run1.csv",
                "content": { "task": "file_size", "size": 1 },
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn direct_upload_imports_in_one_request() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        multipart_request(
            "/files",
            &bearer(testutil::MEMBER_TOKEN),
            &[
                ("name", None, b"run1.csv"),
                ("team_id", None, h.fixture.team_id.to_string().as_bytes()),
                (
                    "mapping_id",
                    None,
                    h.fixture.mapping_id.to_string().as_bytes(),
                ),
                ("file", Some("run1.csv"), CSV_PAYLOAD.as_bytes()),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["state"], "IMPORTED");
    assert_eq!(body["partitions"], 1);

    // Usage is now visible on the lab's storage types.
    let lab_id = h.fixture.lab_id;
    let (status, body) = send(
        &h.app,
        get_request(
            &format!("/labs/{lab_id}/storage_types"),
            Some(&bearer(testutil::MEMBER_TOKEN)),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let storage_types = body["storage_types"].as_array().expect("array");
    assert_eq!(storage_types.len(), 1);
    assert!(storage_types[0]["used_bytes"].as_u64().expect("usage") > 0);
}

#[tokio::test]
async fn quota_exhaustion_maps_to_507() {
    // Room for the discovery-time preview reservation and little else.
    let h = harness_with_quota(DEFAULT_MAX_PREVIEW_BYTES + 64);
    let file_id = drive_to_awaiting_map(&h).await;
    let (status, body) = send(
        &h.app,
        json_request(
            "POST",
            &format!("/files/{file_id}/mapping"),
            Some(&bearer(testutil::MEMBER_TOKEN)),
            json!({ "mapping_id": h.fixture.mapping_id.as_uuid() }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let report = success_report(json!({
        "task": "import",
        "stage": "upload_parquet",
        "data": { "partition_number": 0, "partition_count": 1, "total_row_count": 3 },
    }))
    .to_string();
    let payload = vec![1u8; 4096];
    let (status, body) = send(
        &h.app,
        multipart_request(
            "/report",
            &harvester_auth(),
            &[
                ("report", None, report.as_bytes()),
                ("parquet_file", Some("partition_0.parquet"), payload.as_slice()),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::INSUFFICIENT_STORAGE, "{body}");
    assert_eq!(body["code"], "INSUFFICIENT_STORAGE");

    // The refusal did not damage the file: it can still be imported.
    let (status, body) = send(
        &h.app,
        get_request(
            &format!("/files/{file_id}"),
            Some(&bearer(testutil::MEMBER_TOKEN)),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["state"], "IMPORTING");
}

#[tokio::test]
async fn failed_direct_import_answers_with_the_failed_state() {
    let h = harness_with_quota(16);
    let (status, body) = send(
        &h.app,
        multipart_request(
            "/files",
            &bearer(testutil::MEMBER_TOKEN),
            &[
                ("name", None, b"run1.csv"),
                ("team_id", None, h.fixture.team_id.to_string().as_bytes()),
                (
                    "mapping_id",
                    None,
                    h.fixture.mapping_id.to_string().as_bytes(),
                ),
                ("file", Some("run1.csv"), CSV_PAYLOAD.as_bytes()),
            ],
        ),
    )
    .await;
    // The import failed, but the upload request itself did not.
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["state"], "IMPORT FAILED");
    assert_eq!(body["partitions"], 0);
    let file_id = body["file_id"].as_str().expect("file id").to_string();

    let (status, body) = send(
        &h.app,
        get_request(
            &format!("/files/{file_id}"),
            Some(&bearer(testutil::MEMBER_TOKEN)),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["state"], "IMPORT FAILED");
    assert_eq!(
        body["import_errors"].as_array().expect("errors").len(),
        1
    );
}

#[tokio::test]
async fn uploads_to_a_foreign_team_are_forbidden() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        multipart_request(
            "/files",
            &bearer(testutil::MEMBER_TOKEN),
            &[
                ("name", None, b"run1.csv"),
                (
                    "team_id",
                    None,
                    h.fixture.other_team_id.to_string().as_bytes(),
                ),
                ("file", Some("run1.csv"), CSV_PAYLOAD.as_bytes()),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn mapping_crud_reports_derived_validity() {
    let h = harness();

    // Covering only one of two required types leaves the mapping invalid.
    let (status, body) = send(
        &h.app,
        json_request(
            "POST",
            "/mappings",
            Some(&bearer(testutil::MEMBER_TOKEN)),
            json!({
                "name": "partial",
                "team_id": h.fixture.team_id.as_uuid(),
                "entries": {
                    "Ewe": { "column_type": h.fixture.voltage_type_id.as_uuid() },
                },
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["is_valid"], false);
    assert_eq!(body["missing_required_columns"], json!(["ElapsedTime_s"]));
    let mapping_id = body["id"].as_str().expect("id").to_string();

    // Adding the missing required column makes it valid.
    let (status, body) = send(
        &h.app,
        json_request(
            "PATCH",
            &format!("/mappings/{mapping_id}"),
            Some(&bearer(testutil::MEMBER_TOKEN)),
            json!({
                "entries": {
                    "Ewe": { "column_type": h.fixture.voltage_type_id.as_uuid() },
                    "time": { "column_type": h.fixture.time_type_id.as_uuid() },
                },
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["is_valid"], true);
    assert_eq!(body["missing_required_columns"], json!([]));

    // Outsiders cannot create mappings for a team they do not belong to.
    let (status, body) = send(
        &h.app,
        json_request(
            "POST",
            "/mappings",
            Some(&bearer(testutil::OUTSIDER_TOKEN)),
            json!({
                "name": "intruder",
                "team_id": h.fixture.team_id.as_uuid(),
                "entries": {},
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
}

#[tokio::test]
async fn permission_flags_reflect_membership() {
    let h = harness();
    let file_id = drive_to_awaiting_map(&h).await;

    let (status, body) = send(
        &h.app,
        get_request(
            &format!("/files/{file_id}/permissions"),
            Some(&bearer(testutil::MEMBER_TOKEN)),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["read"], true);
    assert_eq!(body["write"], true);

    // Anonymous callers see no capabilities but still get an answer.
    let (status, body) = send(
        &h.app,
        get_request(&format!("/files/{file_id}/permissions"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["read"], false);
    assert_eq!(body["write"], false);
}

#[tokio::test]
async fn monitored_path_listing_shows_matched_files() {
    let h = harness();
    let file_id = drive_to_awaiting_map(&h).await;
    let path_id = h.fixture.path_id;

    let (status, body) = send(
        &h.app,
        get_request(
            &format!("/monitored_paths/{path_id}/files"),
            Some(&bearer(testutil::MEMBER_TOKEN)),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let files = body["files"].as_array().expect("array");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["id"], file_id);
}

#[tokio::test]
async fn health_and_openapi_are_public() {
    let h = harness();
    let (status, body) = send(&h.app, get_request("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _) = send(&h.app, get_request("/ready", None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&h.app, get_request("/openapi.json", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/report"].is_object());
}
