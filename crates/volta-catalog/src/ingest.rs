//! Harvester report ingestion.
//!
//! One entry point, [`IngestService::ingest`], handles every report a
//! harvester can send: error reports, file-size observations, and the
//! staged import protocol. Reports are dispatched over closed enums so
//! an unknown task or stage fails deserialization instead of reaching a
//! default arm.
//!
//! Row mutations for a report happen in a single catalog transaction.
//! Payload bytes are written to the storage backend between the
//! reserving transaction and the one that marks the reservation
//! uploaded, so a crash in the write window leaves a visible
//! `uploaded == false` reservation rather than silent quota leakage.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use volta_core::observability::ingest_span;
use volta_core::{
    Error, FileId, HarvestErrorId, HarvesterId, PartitionId, Result, StorageBackend, StorageTypeId,
};

use crate::allocator;
use crate::entities::{
    partition_key, preview_key, FileSummary, HarvestErrorRow, ObservedFileRow,
    ParquetPartitionRow,
};
use crate::file_state::FileState;
use crate::matcher;
use crate::metrics;
use crate::store::{Catalog, CatalogStore};

/// Default cap on preview images, reserved at file discovery.
pub const DEFAULT_MAX_PREVIEW_BYTES: u64 = 1024 * 1024;

/// Overall status of a harvester report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Error,
}

/// The body of a success report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum ReportTask {
    /// A crawl observation of a file's current size.
    FileSize { size: u64 },
    /// One stage of the import protocol.
    Import {
        #[serde(flatten)]
        stage: ImportStage,
    },
}

impl ReportTask {
    fn label(&self) -> &'static str {
        match self {
            Self::FileSize { .. } => "file_size",
            Self::Import { .. } => "import",
        }
    }
}

/// Import protocol stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ImportStage {
    /// Parser output: what kind of file this is and what it contains.
    FileMetadata { data: FileMetadata },
    /// Column preview plus a monotonically growing row count.
    DataSummary { data: DataSummaryReport },
    /// One parquet partition; the payload rides alongside the report.
    UploadParquet { data: PartitionUpload },
    /// The preview image; the payload rides alongside the report.
    UploadPng,
    /// End of the upload phase, successful or not.
    UploadComplete { data: UploadCompletion },
    /// The harvester abandoned the import.
    Failed {
        #[serde(default)]
        error: Option<String>,
    },
}

impl ImportStage {
    fn label(&self) -> &'static str {
        match self {
            Self::FileMetadata { .. } => "file_metadata",
            Self::DataSummary { .. } => "data_summary",
            Self::UploadParquet { .. } => "upload_parquet",
            Self::UploadPng => "upload_png",
            Self::UploadComplete { .. } => "upload_complete",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Parser-extracted file metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parser: Option<String>,
    #[serde(default)]
    pub test_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub num_rows: Option<u64>,
    #[serde(default)]
    pub first_sample_no: Option<u64>,
    #[serde(default)]
    pub last_sample_no: Option<u64>,
    #[serde(default)]
    pub extra_metadata: Option<Value>,
}

/// Column preview plus progress watermark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSummaryReport {
    pub summary: FileSummary,
    /// Rows the harvester has processed so far. Monotonic: values at or
    /// below the recorded watermark are no-ops.
    pub rows_seen: u64,
}

/// Announcement of one parquet partition payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionUpload {
    pub partition_number: u32,
    #[serde(default)]
    pub partition_count: Option<u32>,
    #[serde(default)]
    pub total_row_count: Option<u64>,
}

/// End-of-upload accounting. `errors` is keyed by partition number.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadCompletion {
    #[serde(default)]
    pub successes: u32,
    #[serde(default)]
    pub errors: BTreeMap<u32, String>,
}

/// A full harvester report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvesterReport {
    pub status: ReportStatus,
    /// Path on the harvester the report concerns, where applicable.
    #[serde(default)]
    pub path: Option<String>,
    /// Task body for success reports.
    #[serde(default)]
    pub content: Option<ReportTask>,
    /// Error detail for error reports.
    #[serde(default)]
    pub error: Option<String>,
}

/// What a report did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// An error report (or provoked error) was recorded.
    ErrorRecorded {
        error_id: HarvestErrorId,
        file_id: Option<FileId>,
    },
    /// A file was created or updated; `state` is its state afterwards.
    File { file_id: FileId, state: FileState },
    /// A partition payload was accepted and committed.
    Partition {
        file_id: FileId,
        partition_id: PartitionId,
        partition_number: u32,
        state: FileState,
    },
}

/// Ingestion tunables.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Cap on PNG previews; also the amount reserved at file discovery.
    pub max_preview_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_preview_bytes: DEFAULT_MAX_PREVIEW_BYTES,
        }
    }
}

/// The report-ingestion pipeline.
pub struct IngestService {
    store: Arc<CatalogStore>,
    storage: Arc<dyn StorageBackend>,
    config: IngestConfig,
}

impl IngestService {
    pub fn new(
        store: Arc<CatalogStore>,
        storage: Arc<dyn StorageBackend>,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            storage,
            config,
        }
    }

    /// Processes one harvester report.
    ///
    /// `attachment` carries the payload for `upload_parquet` and
    /// `upload_png` stages and must be absent otherwise.
    pub async fn ingest(
        &self,
        api_key: &str,
        report: HarvesterReport,
        attachment: Option<Bytes>,
    ) -> Result<IngestOutcome> {
        let HarvesterReport {
            status,
            path,
            content,
            error,
        } = report;
        let task_label = match (&status, &content) {
            (ReportStatus::Error, _) => "error".to_string(),
            (ReportStatus::Success, Some(ReportTask::Import { stage })) => {
                format!("import:{}", stage.label())
            }
            (ReportStatus::Success, Some(task)) => task.label().to_string(),
            (ReportStatus::Success, None) => {
                metrics::record_report_rejected("missing_content");
                return Err(Error::bad_request("success report carries no content"));
            }
        };
        let span = ingest_span(&task_label, api_key_prefix(api_key), path.as_deref().unwrap_or(""));
        let _guard = span.enter();
        metrics::record_report(&task_label);

        match (status, content) {
            (ReportStatus::Error, _) => self.record_error_report(api_key, path, error),
            (ReportStatus::Success, Some(ReportTask::FileSize { size })) => {
                self.handle_file_size(api_key, path.as_deref(), size)
            }
            (ReportStatus::Success, Some(ReportTask::Import { stage })) => {
                self.handle_import(api_key, path.as_deref(), stage, attachment)
                    .await
            }
            (ReportStatus::Success, None) => {
                Err(Error::bad_request("success report carries no content"))
            }
        }
    }

    fn record_error_report(
        &self,
        api_key: &str,
        path: Option<String>,
        error: Option<String>,
    ) -> Result<IngestOutcome> {
        let message = error.unwrap_or_else(|| "unspecified harvester error".to_string());
        self.store.transaction(|catalog| {
            let harvester_id = authenticate(catalog, api_key, "error")?;
            let file_id = path
                .as_deref()
                .map(matcher::normalize_path)
                .and_then(|p| catalog.file_by_harvester_path(harvester_id, &p))
                .map(|f| f.id);
            let error_id = push_harvest_error(catalog, harvester_id, file_id, message.clone());
            tracing::warn!(harvester = %harvester_id, error = %message, "harvester reported an error");
            Ok(IngestOutcome::ErrorRecorded { error_id, file_id })
        })
    }

    fn handle_file_size(
        &self,
        api_key: &str,
        path: Option<&str>,
        size: u64,
    ) -> Result<IngestOutcome> {
        let path = required_path(path)?;
        let max_preview = self.config.max_preview_bytes;
        let result = self.store.transaction(|catalog| {
            let harvester_id = authenticate(catalog, api_key, "file_size")?;
            let file_id = find_or_create_file(catalog, harvester_id, &path, max_preview)?;
            let file = catalog.file_mut(file_id)?;
            file.last_observed_size_bytes = size;
            file.last_observed_at = Some(Utc::now());
            Ok(IngestOutcome::File {
                file_id,
                state: file.state,
            })
        });
        self.note_refusal(api_key, &path, &discovery_context(&path), result)
    }

    async fn handle_import(
        &self,
        api_key: &str,
        path: Option<&str>,
        stage: ImportStage,
        attachment: Option<Bytes>,
    ) -> Result<IngestOutcome> {
        let path = required_path(path)?;
        match stage {
            ImportStage::FileMetadata { data } => self.apply_metadata(api_key, &path, data),
            ImportStage::DataSummary { data } => self.apply_summary(api_key, &path, data),
            ImportStage::UploadParquet { data } => {
                let payload = required_attachment(attachment)?;
                self.apply_partition(api_key, &path, data, payload).await
            }
            ImportStage::UploadPng => {
                let payload = required_attachment(attachment)?;
                self.apply_preview(api_key, &path, payload).await
            }
            ImportStage::UploadComplete { data } => self.apply_completion(api_key, &path, data),
            ImportStage::Failed { error } => self.apply_failure(api_key, &path, error),
        }
    }

    fn apply_metadata(
        &self,
        api_key: &str,
        path: &str,
        data: FileMetadata,
    ) -> Result<IngestOutcome> {
        let max_preview = self.config.max_preview_bytes;
        let result = self.store.transaction(|catalog| {
            let harvester_id = authenticate(catalog, api_key, "import:file_metadata")?;
            let file_id = find_or_create_file(catalog, harvester_id, path, max_preview)?;
            let file = catalog.file_mut(file_id)?;
            if file.state.is_terminal() {
                return Ok(IngestOutcome::File {
                    file_id,
                    state: file.state,
                });
            }
            if let Some(name) = data.name {
                file.name = Some(name);
            }
            if let Some(parser) = data.parser {
                file.parser = Some(parser);
            }
            if data.test_date.is_some() {
                file.data_generation_date = data.test_date;
            }
            if data.num_rows.is_some() {
                file.num_rows = data.num_rows;
            }
            if data.first_sample_no.is_some() {
                file.first_sample_no = data.first_sample_no;
            }
            if data.last_sample_no.is_some() {
                file.last_sample_no = data.last_sample_no;
            }
            if data.extra_metadata.is_some() {
                file.extra_metadata = data.extra_metadata;
            }
            if file.state.can_transition_to(FileState::AwaitingMapAssignment) {
                file.state = FileState::AwaitingMapAssignment;
            }
            Ok(IngestOutcome::File {
                file_id,
                state: file.state,
            })
        });
        self.note_refusal(api_key, path, &discovery_context(path), result)
    }

    fn apply_summary(
        &self,
        api_key: &str,
        path: &str,
        data: DataSummaryReport,
    ) -> Result<IngestOutcome> {
        let max_preview = self.config.max_preview_bytes;
        let result = self.store.transaction(|catalog| {
            let harvester_id = authenticate(catalog, api_key, "import:data_summary")?;
            let file_id = find_or_create_file(catalog, harvester_id, path, max_preview)?;
            let file = catalog.file_mut(file_id)?;
            if file.state.is_terminal() {
                // A straggling progress report for a finished import.
                return Ok(IngestOutcome::File {
                    file_id,
                    state: file.state,
                });
            }
            match &file.summary {
                None => file.summary = Some(data.summary),
                Some(existing) if *existing == data.summary => {}
                Some(_) => {
                    metrics::record_report_rejected("summary_mismatch");
                    return Err(Error::bad_request(
                        "data summary does not match the summary already recorded for this file",
                    ));
                }
            }
            if data.rows_seen > file.rows_reported {
                file.rows_reported = data.rows_seen;
                file.num_rows = Some(file.num_rows.unwrap_or(0).max(data.rows_seen));
            }
            Ok(IngestOutcome::File {
                file_id,
                state: file.state,
            })
        });
        self.note_refusal(api_key, path, &discovery_context(path), result)
    }

    async fn apply_partition(
        &self,
        api_key: &str,
        path: &str,
        data: PartitionUpload,
        payload: Bytes,
    ) -> Result<IngestOutcome> {
        let bytes_required = payload.len() as u64;

        struct Placed {
            file_id: FileId,
            partition_id: PartitionId,
            storage_type_id: StorageTypeId,
            stale_key: Option<String>,
        }

        let reserve = self.store.transaction(|catalog| {
            let harvester_id = authenticate(catalog, api_key, "import:upload_parquet")?;
            let harvester_lab = catalog.harvester(harvester_id)?.lab_id;
            let normalized = matcher::normalize_path(path);
            let file = catalog
                .file_by_harvester_path(harvester_id, &normalized)
                .ok_or_else(|| Error::not_found("ObservedFile", &normalized))?;
            let file_id = file.id;
            if file.state.is_terminal() {
                return Ok(None);
            }
            if !file.state.accepts_partitions() {
                metrics::record_report_rejected("partition_before_mapping");
                return Err(Error::bad_request(format!(
                    "file is {} and cannot accept partition uploads",
                    file.state
                )));
            }

            let existing = catalog
                .partitions_of(file_id)
                .into_iter()
                .find(|p| p.partition_number == data.partition_number)
                .map(|p| (p.id, p.storage_type_id, p.bytes_required, p.artifact_key()));

            let exclude = existing.as_ref().map(|(_, storage, bytes, _)| (*storage, *bytes));
            let storage_type_id = match allocator::reserve(catalog, harvester_lab, bytes_required, exclude) {
                Ok(id) => id,
                Err(e) if e.is_insufficient_storage() => {
                    metrics::record_reservation_refused();
                    return Err(e);
                }
                Err(e) => return Err(e),
            };
            metrics::record_reservation(bytes_required);

            let mut stale_key = None;
            if let Some((old_id, old_storage, _, old_key)) = existing {
                catalog.partitions.remove(&old_id);
                if old_storage != storage_type_id {
                    stale_key = Some(old_key);
                }
            }

            let partition_id = PartitionId::generate();
            catalog.partitions.insert(
                partition_id,
                ParquetPartitionRow {
                    id: partition_id,
                    file_id,
                    partition_number: data.partition_number,
                    bytes_required,
                    storage_type_id,
                    uploaded: false,
                    upload_errors: Vec::new(),
                    created_at: Utc::now(),
                },
            );

            let file = catalog.file_mut(file_id)?;
            if file.state == FileState::ImportFailed {
                file.state = FileState::Importing;
                file.import_errors.clear();
            }
            if data.partition_count.is_some() {
                file.num_partitions = data.partition_count.map(u64::from);
            }
            if data.total_row_count.is_some() {
                file.num_rows = data.total_row_count;
            }
            Ok(Some(Placed {
                file_id,
                partition_id,
                storage_type_id,
                stale_key,
            }))
        });
        let placed = self.note_refusal(
            api_key,
            path,
            &format!("partition {}", data.partition_number),
            reserve,
        )?;

        let Some(placed) = placed else {
            // Terminal file: the partition was already committed.
            return self.store.read(|catalog| {
                let harvester_id = catalog.harvester_by_key(api_key)?.id;
                let normalized = matcher::normalize_path(path);
                let file = catalog
                    .file_by_harvester_path(harvester_id, &normalized)
                    .ok_or_else(|| Error::not_found("ObservedFile", &normalized))?;
                Ok(IngestOutcome::File {
                    file_id: file.id,
                    state: file.state,
                })
            });
        };

        let key = partition_key(placed.storage_type_id, placed.file_id, data.partition_number);
        if let Err(e) = self.storage.put(&key, payload).await {
            let message = format!("partition {} write failed: {e}", data.partition_number);
            self.store.transaction(|catalog| {
                if let Some(partition) = catalog.partitions.get_mut(&placed.partition_id) {
                    partition.upload_errors.push(message.clone());
                }
                let harvester_id = catalog.harvester_by_key(api_key)?.id;
                push_harvest_error(catalog, harvester_id, Some(placed.file_id), message.clone());
                Ok(())
            })?;
            return Err(e);
        }
        if let Some(stale_key) = placed.stale_key {
            if let Err(e) = self.storage.delete(&stale_key).await {
                tracing::warn!(key = %stale_key, error = %e, "failed to delete superseded partition payload");
            }
        }

        self.store.transaction(|catalog| {
            let partition = catalog
                .partitions
                .get_mut(&placed.partition_id)
                .ok_or_else(|| Error::not_found("ParquetPartition", placed.partition_id))?;
            partition.uploaded = true;
            let state = catalog.file(placed.file_id)?.state;
            Ok(IngestOutcome::Partition {
                file_id: placed.file_id,
                partition_id: placed.partition_id,
                partition_number: data.partition_number,
                state,
            })
        })
    }

    async fn apply_preview(&self, api_key: &str, path: &str, payload: Bytes) -> Result<IngestOutcome> {
        let size = payload.len() as u64;
        if size > self.config.max_preview_bytes {
            let refusal = Err(Error::insufficient_storage(
                size,
                format!(
                    "preview exceeds the configured cap of {} bytes",
                    self.config.max_preview_bytes
                ),
            ));
            return self.note_refusal(api_key, path, "preview upload", refusal);
        }

        let reserve = self.store.transaction(|catalog| {
            let harvester_id = authenticate(catalog, api_key, "import:upload_png")?;
            let harvester_lab = catalog.harvester(harvester_id)?.lab_id;
            let normalized = matcher::normalize_path(path);
            let file = catalog
                .file_by_harvester_path(harvester_id, &normalized)
                .ok_or_else(|| Error::not_found("ObservedFile", &normalized))?;
            let file_id = file.id;
            if file.state.is_terminal() {
                return Ok(None);
            }
            let exclude = file
                .preview_storage_type
                .map(|storage| (storage, file.preview_bytes_reserved));
            let storage_type_id = allocator::reserve(catalog, harvester_lab, size, exclude)?;
            let file = catalog.file_mut(file_id)?;
            file.preview_storage_type = Some(storage_type_id);
            file.preview_bytes_reserved = size;
            Ok(Some((file_id, storage_type_id, file.state)))
        });
        let reserved = self.note_refusal(api_key, path, "preview upload", reserve)?;

        let Some((file_id, storage_type_id, state)) = reserved else {
            return self.store.read(|catalog| {
                let normalized = matcher::normalize_path(path);
                let harvester_id = catalog.harvester_by_key(api_key)?.id;
                let file = catalog
                    .file_by_harvester_path(harvester_id, &normalized)
                    .ok_or_else(|| Error::not_found("ObservedFile", &normalized))?;
                Ok(IngestOutcome::File {
                    file_id: file.id,
                    state: file.state,
                })
            });
        };

        self.storage
            .put(&preview_key(storage_type_id, file_id), payload)
            .await?;
        self.store.transaction(|catalog| {
            catalog.file_mut(file_id)?.preview_uploaded = true;
            Ok(())
        })?;
        Ok(IngestOutcome::File { file_id, state })
    }

    fn apply_completion(
        &self,
        api_key: &str,
        path: &str,
        data: UploadCompletion,
    ) -> Result<IngestOutcome> {
        self.store.transaction(|catalog| {
            let harvester_id = authenticate(catalog, api_key, "import:upload_complete")?;
            let normalized = matcher::normalize_path(path);
            let file = catalog
                .file_by_harvester_path(harvester_id, &normalized)
                .ok_or_else(|| Error::not_found("ObservedFile", &normalized))?;
            let file_id = file.id;
            if file.state.is_terminal() {
                return Ok(IngestOutcome::File {
                    file_id,
                    state: file.state,
                });
            }

            if data.errors.is_empty() {
                if !file.state.can_transition_to(FileState::Imported) {
                    metrics::record_report_rejected("premature_completion");
                    return Err(Error::bad_request(format!(
                        "file is {} and cannot complete an import",
                        file.state
                    )));
                }
                let partition_count = catalog.partitions_of(file_id).len() as u64;
                let file = catalog.file_mut(file_id)?;
                file.num_partitions = Some(partition_count);
                file.state = FileState::Imported;
                metrics::record_import_completed();
                tracing::info!(file = %file_id, "import completed");
                return Ok(IngestOutcome::File {
                    file_id,
                    state: FileState::Imported,
                });
            }

            // Failure path: attach errors to their partitions, fail the
            // file, and leave an operator-visible error row.
            let partition_ids: Vec<(PartitionId, u32)> = catalog
                .partitions_of(file_id)
                .into_iter()
                .map(|p| (p.id, p.partition_number))
                .collect();
            for (partition_number, message) in &data.errors {
                if let Some((id, _)) = partition_ids
                    .iter()
                    .find(|(_, number)| number == partition_number)
                {
                    let partition = catalog
                        .partitions
                        .get_mut(id)
                        .ok_or_else(|| Error::not_found("ParquetPartition", id))?;
                    if !partition.upload_errors.contains(message) {
                        partition.upload_errors.push(message.clone());
                    }
                }
            }
            let joined = data
                .errors
                .iter()
                .map(|(number, message)| format!("partition {number}: {message}"))
                .collect::<Vec<_>>()
                .join("; ");
            push_harvest_error(catalog, harvester_id, Some(file_id), joined.clone());
            let file = catalog.file_mut(file_id)?;
            file.state = FileState::ImportFailed;
            file.import_errors.push(joined);
            metrics::record_import_failed();
            tracing::warn!(file = %file_id, errors = data.errors.len(), "import completed with errors");
            Ok(IngestOutcome::File {
                file_id,
                state: FileState::ImportFailed,
            })
        })
    }

    fn apply_failure(
        &self,
        api_key: &str,
        path: &str,
        error: Option<String>,
    ) -> Result<IngestOutcome> {
        self.store.transaction(|catalog| {
            let harvester_id = authenticate(catalog, api_key, "import:failed")?;
            let normalized = matcher::normalize_path(path);
            let file = catalog
                .file_by_harvester_path(harvester_id, &normalized)
                .ok_or_else(|| Error::not_found("ObservedFile", &normalized))?;
            let file_id = file.id;
            if file.state.is_terminal() {
                return Ok(IngestOutcome::File {
                    file_id,
                    state: file.state,
                });
            }
            let message = error.unwrap_or_else(|| "import failed".to_string());
            push_harvest_error(catalog, harvester_id, Some(file_id), message.clone());
            let file = catalog.file_mut(file_id)?;
            file.state = FileState::ImportFailed;
            file.import_errors.push(message);
            metrics::record_import_failed();
            Ok(IngestOutcome::File {
                file_id,
                state: FileState::ImportFailed,
            })
        })
    }

    /// Makes a quota refusal durable.
    ///
    /// The refusing transaction discards everything it wrote, including
    /// any error row pushed inside it, so the `HarvestError` row is
    /// committed here in a transaction of its own. The original refusal
    /// is returned unchanged either way.
    fn note_refusal<T>(
        &self,
        api_key: &str,
        path: &str,
        context: &str,
        result: Result<T>,
    ) -> Result<T> {
        let Err(e) = &result else {
            return result;
        };
        if !e.is_insufficient_storage() {
            return result;
        }
        let message = format!("{context} refused: {e}");
        let recorded = self.store.transaction(|catalog| {
            let harvester_id = catalog.harvester_by_key(api_key)?.id;
            let file_id = catalog
                .file_by_harvester_path(harvester_id, &matcher::normalize_path(path))
                .map(|f| f.id);
            push_harvest_error(catalog, harvester_id, file_id, message.clone());
            Ok(())
        });
        if let Err(record_err) = recorded {
            tracing::warn!(error = %record_err, "failed to record a quota refusal");
        }
        result
    }
}

fn discovery_context(path: &str) -> String {
    format!("discovery of '{}'", matcher::normalize_path(path))
}

fn api_key_prefix(api_key: &str) -> &str {
    // Only the non-secret prefix goes into spans.
    api_key.get(..12).unwrap_or(api_key)
}

fn required_path(path: Option<&str>) -> Result<String> {
    path.filter(|p| !p.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            metrics::record_report_rejected("missing_path");
            Error::bad_request("report names no path")
        })
}

fn required_attachment(attachment: Option<Bytes>) -> Result<Bytes> {
    attachment.filter(|b| !b.is_empty()).ok_or_else(|| {
        metrics::record_report_rejected("missing_attachment");
        Error::bad_request("upload stage carries no payload")
    })
}

/// Authenticates the report and records the check-in.
fn authenticate(catalog: &mut Catalog, api_key: &str, task: &str) -> Result<HarvesterId> {
    let harvester_id = catalog.harvester_by_key(api_key)?.id;
    let harvester = catalog
        .harvesters
        .get_mut(&harvester_id)
        .ok_or_else(|| Error::not_found("Harvester", harvester_id))?;
    harvester.last_check_in = Some(Utc::now());
    harvester.last_check_in_task = Some(task.to_string());
    Ok(harvester_id)
}

fn push_harvest_error(
    catalog: &mut Catalog,
    harvester_id: HarvesterId,
    file_id: Option<FileId>,
    error: String,
) -> HarvestErrorId {
    let error_id = HarvestErrorId::generate();
    catalog.harvest_errors.push(HarvestErrorRow {
        id: error_id,
        harvester_id,
        file_id,
        error,
        created_at: Utc::now(),
    });
    metrics::record_harvest_error();
    error_id
}

/// Resolves a reported path to its observed file, creating the file on
/// first sight.
///
/// Creation requires the path to fall under at least one of the
/// harvester's active monitored paths and reserves the preview budget
/// up front; a lab with no quota left cannot even discover new files.
fn find_or_create_file(
    catalog: &mut Catalog,
    harvester_id: HarvesterId,
    path: &str,
    max_preview_bytes: u64,
) -> Result<FileId> {
    let normalized = matcher::normalize_path(path);
    let harvester_lab = catalog.harvester(harvester_id)?.lab_id;

    let (matched_ids, first_team) = {
        let all_paths = catalog.paths_of_harvester(harvester_id);
        let mut matches = matcher::matching_paths(&all_paths, &normalized);
        matches.sort_by_key(|p| (p.created_at, p.id.as_uuid()));
        (
            matches.iter().map(|p| p.id).collect::<Vec<_>>(),
            matches.first().map(|p| p.team_id),
        )
    };

    if let Some(existing) = catalog.file_by_harvester_path(harvester_id, &normalized) {
        let file_id = existing.id;
        let file = catalog.file_mut(file_id)?;
        for id in matched_ids {
            if !file.monitored_path_ids.contains(&id) {
                file.monitored_path_ids.push(id);
            }
        }
        return Ok(file_id);
    }

    let Some(team_id) = first_team else {
        metrics::record_report_rejected("unmatched_path");
        return Err(Error::bad_request(format!(
            "path '{normalized}' matches no monitored path of this harvester"
        )));
    };

    let preview_storage = match allocator::reserve(catalog, harvester_lab, max_preview_bytes, None)
    {
        Ok(id) => Some(id),
        Err(e) if e.is_insufficient_storage() => {
            metrics::record_reservation_refused();
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    let file_id = FileId::generate();
    let name = normalized.rsplit('/').next().map(ToOwned::to_owned);
    catalog.files.insert(
        file_id,
        ObservedFileRow {
            id: file_id,
            harvester_id: Some(harvester_id),
            uploader: None,
            team_id,
            path: normalized.clone(),
            monitored_path_ids: matched_ids,
            state: FileState::AwaitingFileMetadata,
            mapping_id: None,
            name,
            parser: None,
            data_generation_date: None,
            num_rows: None,
            num_partitions: None,
            first_sample_no: None,
            last_sample_no: None,
            extra_metadata: None,
            summary: None,
            rows_reported: 0,
            last_observed_size_bytes: 0,
            last_observed_at: None,
            preview_bytes_reserved: max_preview_bytes,
            preview_storage_type: preview_storage,
            preview_uploaded: false,
            import_errors: Vec::new(),
            thresholds: volta_core::AccessThresholds::resource_default(),
            created_at: Utc::now(),
        },
    );
    tracing::info!(file = %file_id, path = %normalized, "new file discovered");
    Ok(file_id)
}
