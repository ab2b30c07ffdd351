//! End-to-end exercises of the direct-upload pipeline.

use std::sync::Arc;

use bytes::Bytes;

use volta_catalog::file_state::FileState;
use volta_catalog::partition_codec;
use volta_catalog::store::CatalogStore;
use volta_catalog::testutil::Fixture;
use volta_catalog::upload::{UploadConfig, UploadRequest, UploadService};
use volta_core::{Error, MemoryBackend, Principal, StorageBackend};

const PAYLOAD: &str = "time,Ewe,cycle\n0.0,3.70,1\n0.5,3.71,1\n1.0,3.72,2\n";

struct Harness {
    fixture: Fixture,
    store: Arc<CatalogStore>,
    storage: Arc<MemoryBackend>,
    service: UploadService,
}

fn harness_with(config: UploadConfig, quota: u64) -> Harness {
    let mut fixture = Fixture::with_quota(quota);
    let catalog = std::mem::take(&mut fixture.catalog);
    let store = Arc::new(CatalogStore::with_catalog(catalog));
    let storage = Arc::new(MemoryBackend::new());
    let service = UploadService::new(
        Arc::clone(&store),
        storage.clone() as Arc<dyn StorageBackend>,
        config,
    );
    Harness {
        fixture,
        store,
        storage,
        service,
    }
}

fn harness() -> Harness {
    harness_with(UploadConfig::default(), 10 * 1024 * 1024)
}

fn request(h: &Harness, mapping: bool) -> UploadRequest {
    UploadRequest {
        name: "run1.csv".to_string(),
        team_id: h.fixture.team_id,
        mapping_id: mapping.then_some(h.fixture.mapping_id),
        target_file_id: None,
        payload: Bytes::from(PAYLOAD),
    }
}

#[tokio::test]
async fn upload_with_mapping_imports_in_one_request() {
    let h = harness();
    let member = Principal::User(h.fixture.member_id);

    let outcome = h
        .service
        .upload(&member, request(&h, true))
        .await
        .expect("upload succeeds");
    assert_eq!(outcome.state, FileState::Imported);
    assert_eq!(outcome.partitions, 1);

    let (key, preview_uploaded) = h
        .store
        .read(|catalog| {
            let file = catalog.file(outcome.file_id)?;
            assert_eq!(file.num_rows, Some(3));
            assert_eq!(file.num_partitions, Some(1));
            assert_eq!(file.uploader, Some(h.fixture.member_id));
            let partitions = catalog.partitions_of(outcome.file_id);
            assert_eq!(partitions.len(), 1);
            assert!(partitions[0].uploaded);
            Ok((partitions[0].artifact_key(), file.preview_uploaded))
        })
        .expect("rows recorded");
    assert!(preview_uploaded);

    // The stored partition is real parquet with every source row.
    let stored = h.storage.get(&key).await.expect("partition stored");
    assert_eq!(
        partition_codec::partition_row_count(&stored).expect("readable parquet"),
        3
    );
}

#[tokio::test]
async fn upload_without_mapping_awaits_assignment() {
    let h = harness();
    let outcome = h
        .service
        .upload(&Principal::User(h.fixture.member_id), request(&h, false))
        .await
        .expect("upload succeeds");
    assert_eq!(outcome.state, FileState::AwaitingMapAssignment);
    assert_eq!(outcome.partitions, 0);
    h.store
        .read(|catalog| {
            let file = catalog.file(outcome.file_id)?;
            assert!(file.summary.is_some());
            assert!(file.mapping_id.is_none());
            Ok(())
        })
        .expect("read");
    assert!(h.storage.list("").await.expect("list").is_empty());
}

#[tokio::test]
async fn resume_requires_exact_summary_equality() {
    let h = harness();
    let member = Principal::User(h.fixture.member_id);
    let first = h
        .service
        .upload(&member, request(&h, false))
        .await
        .expect("first upload");

    // Same columns, different values: not the same file.
    let mut resume = request(&h, true);
    resume.target_file_id = Some(first.file_id);
    resume.payload = Bytes::from(PAYLOAD.replace("3.70", "3.99"));
    let err = h.service.upload(&member, resume).await.unwrap_err();
    assert!(matches!(err, Error::BadRequest { .. }));

    // The exact payload resumes and imports.
    let mut resume = request(&h, true);
    resume.target_file_id = Some(first.file_id);
    let outcome = h.service.upload(&member, resume).await.expect("resume succeeds");
    assert_eq!(outcome.file_id, first.file_id);
    assert_eq!(outcome.state, FileState::Imported);
}

#[tokio::test]
async fn upload_to_a_foreign_team_is_forbidden() {
    let h = harness();
    let mut req = request(&h, false);
    req.team_id = h.fixture.other_team_id;
    let err = h
        .service
        .upload(&Principal::User(h.fixture.member_id), req)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden { .. }));
}

#[tokio::test]
async fn quota_exhaustion_fails_the_import_and_records_why() {
    let h = harness_with(UploadConfig::default(), 16);
    let member = Principal::User(h.fixture.member_id);

    // The import fails, but the request itself succeeded: the caller
    // gets the failed file back, not an error.
    let outcome = h
        .service
        .upload(&member, request(&h, true))
        .await
        .expect("upload is answered");
    assert_eq!(outcome.state, FileState::ImportFailed);
    assert_eq!(outcome.partitions, 0);

    h.store
        .read(|catalog| {
            let file = catalog.file(outcome.file_id)?;
            assert_eq!(file.state, FileState::ImportFailed);
            assert_eq!(file.import_errors.len(), 1);
            assert!(file.import_errors[0].contains("insufficient storage"));
            Ok(())
        })
        .expect("read");
}

#[tokio::test]
async fn rows_are_chunked_by_the_partition_cap() {
    let config = UploadConfig {
        max_partition_rows: 2,
        ..UploadConfig::default()
    };
    let h = harness_with(config, 10 * 1024 * 1024);
    let outcome = h
        .service
        .upload(&Principal::User(h.fixture.member_id), request(&h, true))
        .await
        .expect("upload succeeds");
    // 3 rows with a 2-row cap: two partitions.
    assert_eq!(outcome.partitions, 2);
    h.store
        .read(|catalog| {
            let numbers: Vec<u32> = catalog
                .partitions_of(outcome.file_id)
                .iter()
                .map(|p| p.partition_number)
                .collect();
            assert_eq!(numbers, vec![0, 1]);
            Ok(())
        })
        .expect("read");
}

#[tokio::test]
async fn anonymous_uploads_are_forbidden() {
    let h = harness();
    let err = h
        .service
        .upload(&Principal::Anonymous, request(&h, false))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden { .. }));
}
