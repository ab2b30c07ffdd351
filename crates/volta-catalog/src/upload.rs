//! Direct file uploads.
//!
//! Users can push cycler files straight to the API instead of through a
//! harvester. The upload is summarized and, if a mapping is available,
//! imported server-side in one request: rows are rendered through the
//! mapping, chunked into parquet partitions, quota-checked, and written
//! to storage, with a PNG preview alongside.
//!
//! Resume semantics: a payload may target an existing file, but only if
//! it summarizes to exactly the file's recorded summary. That equality
//! is the only identity check; names and sizes prove nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;

use volta_core::{
    AccessKind, AccessThresholds, Error, FileId, MappingId, PartitionId, PayloadSpool, Principal,
    Result, StorageBackend, TeamId,
};

use crate::access::{self, Resource};
use crate::allocator;
use crate::entities::{
    partition_key, preview_key, DataType, FileSummary, ObservedFileRow, ParquetPartitionRow,
};
use crate::file_state::FileState;
use crate::mapping::{self, RenderedColumn};
use crate::metrics;
use crate::partition_codec::{self, OutputColumn};
use crate::preview;
use crate::store::CatalogStore;
use crate::tabular::{self, ParsedTable};

/// Upload tunables.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Row cap per parquet partition for direct uploads.
    pub max_partition_rows: u64,
    /// Cap on the rendered preview image.
    pub max_preview_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_partition_rows: 100_000,
            max_preview_bytes: crate::ingest::DEFAULT_MAX_PREVIEW_BYTES,
        }
    }
}

/// A direct upload request.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Display name for a new file; ignored when resuming.
    pub name: String,
    /// Owning team for a new file; ignored when resuming.
    pub team_id: TeamId,
    /// Mapping to import with. Absent leaves the file awaiting one.
    pub mapping_id: Option<MappingId>,
    /// Existing file to resume instead of creating a new one.
    pub target_file_id: Option<FileId>,
    pub payload: Bytes,
}

/// Result of a direct upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub file_id: FileId,
    pub state: FileState,
    pub partitions: u32,
}

/// The direct-upload pipeline.
pub struct UploadService {
    store: Arc<CatalogStore>,
    storage: Arc<dyn StorageBackend>,
    config: UploadConfig,
}

impl UploadService {
    pub fn new(
        store: Arc<CatalogStore>,
        storage: Arc<dyn StorageBackend>,
        config: UploadConfig,
    ) -> Self {
        Self {
            store,
            storage,
            config,
        }
    }

    /// Accepts an upload, creating or resuming its file, and runs the
    /// import when a mapping is available.
    ///
    /// An import that starts and then fails is not a request error: the
    /// file is marked `ImportFailed` with the cause recorded, and the
    /// outcome reports that state. Only problems with the request itself
    /// (authorization, unparseable payloads, identity mismatches) are
    /// returned as errors.
    pub async fn upload(
        &self,
        principal: &Principal,
        request: UploadRequest,
    ) -> Result<UploadOutcome> {
        // Parsed off a disk spool so the payload buffer is not held
        // twice; the spool is removed on every exit.
        let spool = PayloadSpool::write(&request.payload)?;
        let table = tabular::parse_csv_file(spool.path())?;
        drop(spool);
        let summary = tabular::summarize(&table);

        let (file_id, mapping_id) = self.begin(principal, &request, &summary)?;
        let Some(mapping_id) = mapping_id else {
            return Ok(UploadOutcome {
                file_id,
                state: FileState::AwaitingMapAssignment,
                partitions: 0,
            });
        };

        match self.run_import(file_id, mapping_id, &table, &summary).await {
            Ok(partitions) => Ok(UploadOutcome {
                file_id,
                state: FileState::Imported,
                partitions,
            }),
            Err(e) => {
                let message = e.to_string();
                self.store.transaction(|catalog| {
                    let file = catalog.file_mut(file_id)?;
                    file.state = FileState::ImportFailed;
                    file.import_errors.push(message.clone());
                    Ok(())
                })?;
                metrics::record_import_failed();
                tracing::warn!(file = %file_id, error = %message, "direct import failed");
                Ok(UploadOutcome {
                    file_id,
                    state: FileState::ImportFailed,
                    partitions: 0,
                })
            }
        }
    }

    /// Creates or resumes the file row and assigns the mapping, all in
    /// one transaction. Returns the mapping to import with, if any.
    fn begin(
        &self,
        principal: &Principal,
        request: &UploadRequest,
        summary: &FileSummary,
    ) -> Result<(FileId, Option<MappingId>)> {
        let request = request.clone();
        let summary = summary.clone();
        let principal = principal.clone();
        self.store.transaction(move |catalog| {
            let uploader = match &principal {
                Principal::User(id) => Some(*id),
                Principal::Service => None,
                Principal::Harvester(_) | Principal::Anonymous => {
                    return Err(Error::forbidden(
                        "direct uploads require a user or service credential",
                    ))
                }
            };

            let file_id = match request.target_file_id {
                Some(file_id) => {
                    access::require_capability(
                        catalog,
                        &principal,
                        Resource::File(file_id),
                        AccessKind::Edit,
                    )?;
                    let file = catalog.file(file_id)?;
                    if !matches!(
                        file.state,
                        FileState::AwaitingMapAssignment | FileState::ImportFailed
                    ) {
                        return Err(Error::bad_request(format!(
                            "file is {} and cannot take a new payload",
                            file.state
                        )));
                    }
                    match &file.summary {
                        Some(recorded) if *recorded == summary => {}
                        Some(_) => {
                            return Err(Error::bad_request(
                                "payload does not summarize to the target file's recorded summary",
                            ))
                        }
                        None => {
                            return Err(Error::bad_request(
                                "target file has no recorded summary to match against",
                            ))
                        }
                    }
                    file_id
                }
                None => {
                    if !principal.is_service() {
                        let scopes = access::scopes_for(catalog, &principal);
                        let in_team = scopes.member_team_ids.contains(&request.team_id)
                            || scopes
                                .admin_lab_ids
                                .contains(&catalog.team(request.team_id)?.lab_id);
                        if !in_team {
                            return Err(Error::forbidden(
                                "uploads must go to a team the uploader belongs to",
                            ));
                        }
                    }
                    let file_id = FileId::generate();
                    catalog.files.insert(
                        file_id,
                        ObservedFileRow {
                            id: file_id,
                            harvester_id: None,
                            uploader,
                            team_id: request.team_id,
                            path: request.name.clone(),
                            monitored_path_ids: Vec::new(),
                            state: FileState::AwaitingMapAssignment,
                            mapping_id: None,
                            name: Some(request.name.clone()),
                            parser: None,
                            data_generation_date: None,
                            num_rows: None,
                            num_partitions: None,
                            first_sample_no: None,
                            last_sample_no: None,
                            extra_metadata: None,
                            summary: Some(summary.clone()),
                            rows_reported: 0,
                            last_observed_size_bytes: request.payload.len() as u64,
                            last_observed_at: Some(Utc::now()),
                            preview_bytes_reserved: 0,
                            preview_storage_type: None,
                            preview_uploaded: false,
                            import_errors: Vec::new(),
                            thresholds: AccessThresholds::resource_default(),
                            created_at: Utc::now(),
                        },
                    );
                    file_id
                }
            };

            let mapping_id = request
                .mapping_id
                .or(catalog.file(file_id)?.mapping_id);
            if let Some(mapping_id) = mapping_id {
                access::require_capability(
                    catalog,
                    &principal,
                    Resource::Mapping(mapping_id),
                    AccessKind::Read,
                )?;
                // Re-validated even on resume: the catalog may have
                // grown new required column types since.
                let entries = catalog.mapping(mapping_id)?.entries.clone();
                mapping::check_applicable(catalog, &entries, &summary)?;
                let file = catalog.file_mut(file_id)?;
                if !file.state.can_transition_to(FileState::Importing) {
                    return Err(Error::bad_request(format!(
                        "file is {} and cannot start an import",
                        file.state
                    )));
                }
                file.mapping_id = Some(mapping_id);
                file.import_errors.clear();
                file.state = FileState::Importing;
            }
            Ok((file_id, mapping_id))
        })
    }

    /// Renders, chunks, and writes the payload. Returns the partition
    /// count on success.
    async fn run_import(
        &self,
        file_id: FileId,
        mapping_id: MappingId,
        table: &ParsedTable,
        summary: &FileSummary,
    ) -> Result<u32> {
        let (plan, lab_id) = self.store.read(|catalog| {
            let entries = catalog.mapping(mapping_id)?.entries.clone();
            let plan = mapping::render_plan(catalog, &entries)?;
            let team_id = catalog.file(file_id)?.team_id;
            Ok((plan, catalog.team(team_id)?.lab_id))
        })?;

        let columns = output_columns(&plan, summary);
        let rendered: Vec<BTreeMap<String, Value>> = table
            .rows
            .iter()
            .map(|row| mapping::render_row(&plan, row))
            .collect();

        let chunk_rows = self.config.max_partition_rows.max(1) as usize;
        let chunks: Vec<&[BTreeMap<String, Value>]> = if rendered.is_empty() {
            vec![&[]]
        } else {
            rendered.chunks(chunk_rows).collect()
        };

        for (number, chunk) in chunks.iter().enumerate() {
            let number = number as u32;
            let payload = partition_codec::encode_partition(&columns, chunk)?;
            let bytes_required = payload.len() as u64;

            let (partition_id, storage_type_id) = self.store.transaction(|catalog| {
                let existing = catalog
                    .partitions_of(file_id)
                    .into_iter()
                    .find(|p| p.partition_number == number)
                    .map(|p| (p.id, p.storage_type_id, p.bytes_required));
                let exclude = existing.map(|(_, storage, bytes)| (storage, bytes));
                let storage_type_id =
                    allocator::reserve(catalog, lab_id, bytes_required, exclude).inspect_err(|e| {
                        if e.is_insufficient_storage() {
                            metrics::record_reservation_refused();
                        }
                    })?;
                metrics::record_reservation(bytes_required);
                if let Some((old_id, _, _)) = existing {
                    catalog.partitions.remove(&old_id);
                }
                let partition_id = PartitionId::generate();
                catalog.partitions.insert(
                    partition_id,
                    ParquetPartitionRow {
                        id: partition_id,
                        file_id,
                        partition_number: number,
                        bytes_required,
                        storage_type_id,
                        uploaded: false,
                        upload_errors: Vec::new(),
                        created_at: Utc::now(),
                    },
                );
                Ok((partition_id, storage_type_id))
            })?;

            self.storage
                .put(&partition_key(storage_type_id, file_id, number), payload)
                .await?;
            self.store.transaction(|catalog| {
                catalog
                    .partitions
                    .get_mut(&partition_id)
                    .ok_or_else(|| Error::not_found("ParquetPartition", partition_id))?
                    .uploaded = true;
                Ok(())
            })?;
        }

        let preview_column = preview_column(&plan, &columns);
        let preview_bytes = preview::render_preview(&preview_column, &rendered)?;
        if preview_bytes.len() as u64 <= self.config.max_preview_bytes {
            let storage_type_id = self.store.transaction(|catalog| {
                let file = catalog.file(file_id)?;
                let exclude = file
                    .preview_storage_type
                    .map(|storage| (storage, file.preview_bytes_reserved));
                let storage_type_id =
                    allocator::reserve(catalog, lab_id, preview_bytes.len() as u64, exclude)?;
                let file = catalog.file_mut(file_id)?;
                file.preview_storage_type = Some(storage_type_id);
                file.preview_bytes_reserved = preview_bytes.len() as u64;
                Ok(storage_type_id)
            })?;
            self.storage
                .put(&preview_key(storage_type_id, file_id), preview_bytes)
                .await?;
            self.store.transaction(|catalog| {
                catalog.file_mut(file_id)?.preview_uploaded = true;
                Ok(())
            })?;
        }

        let partitions = chunks.len() as u32;
        self.store.transaction(|catalog| {
            let file = catalog.file_mut(file_id)?;
            file.num_rows = Some(table.row_count());
            file.num_partitions = Some(u64::from(partitions));
            file.state = FileState::Imported;
            Ok(())
        })?;
        metrics::record_import_completed();
        tracing::info!(file = %file_id, partitions, "direct import completed");
        Ok(partitions)
    }
}

/// Output schema: mapped columns with their resolved types, unmapped
/// columns as floats, ordered by output name.
fn output_columns(
    plan: &BTreeMap<String, RenderedColumn>,
    summary: &FileSummary,
) -> Vec<OutputColumn> {
    let mut columns: BTreeMap<String, DataType> = BTreeMap::new();
    for name in summary.column_names() {
        match plan.get(name) {
            Some(rendered) => {
                columns.insert(rendered.output_name.clone(), rendered.data_type);
            }
            None => {
                columns.insert(name.to_string(), DataType::Float);
            }
        }
    }
    columns
        .into_iter()
        .map(|(name, data_type)| OutputColumn { name, data_type })
        .collect()
}

/// Column drawn in the preview: the first mapped float column, falling
/// back to the first column of the file.
fn preview_column(plan: &BTreeMap<String, RenderedColumn>, columns: &[OutputColumn]) -> String {
    plan.values()
        .filter(|c| c.data_type == DataType::Float)
        .map(|c| c.output_name.clone())
        .min()
        .or_else(|| columns.first().map(|c| c.name.clone()))
        .unwrap_or_default()
}
