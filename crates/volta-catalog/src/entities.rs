//! Catalog row types.
//!
//! Rows are plain data: every derived quantity (bytes used, mapping
//! validity, missing required columns) is computed on demand by the
//! modules that own the rule, never cached on the row.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use volta_core::{
    AccessThresholds, ArbitraryFileId, ColumnTypeId, FileId, HarvestErrorId, HarvesterId, LabId,
    MappingId, MonitoredPathId, PartitionId, StorageTypeId, TeamId, UnitId, UserId,
};

use crate::file_state::FileState;

/// A lab: the top-level tenancy unit. Teams belong to labs; storage
/// quotas are provisioned per lab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabRow {
    pub id: LabId,
    pub name: String,
    /// Users with administrative rights over the lab and every team in it.
    pub admins: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

/// A team within a lab. Teams own resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRow {
    pub id: TeamId,
    pub lab_id: LabId,
    pub name: String,
    /// Users with administrative rights over the team.
    pub admins: Vec<UserId>,
    /// Ordinary members of the team.
    pub members: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

/// A human user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub id: UserId,
    pub username: String,
    /// Opaque bearer token for API access, if one has been issued.
    pub api_token: Option<String>,
    /// Service accounts bypass capability checks entirely.
    pub is_service: bool,
    pub active: bool,
}

/// Where a storage type keeps its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageKind {
    /// Platform-managed storage on the API host.
    Managed,
    /// Lab-provided S3-compatible bucket.
    ExternalS3 {
        bucket: String,
        #[serde(default)]
        prefix: String,
        region: String,
    },
}

/// A quota-bearing storage location owned by a lab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageTypeRow {
    pub id: StorageTypeId,
    pub lab_id: LabId,
    pub name: String,
    pub kind: StorageKind,
    /// Hard byte budget. Usage is summed on demand from reservations.
    pub quota_bytes: u64,
    /// Allocation order: lower priority is tried first.
    pub priority: i16,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// A harvester agent registered to a lab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvesterRow {
    pub id: HarvesterId,
    pub lab_id: LabId,
    pub name: String,
    /// Shared-secret credential, `volta_hrv_`-prefixed.
    pub api_key: String,
    pub active: bool,
    /// Seconds the harvester sleeps between crawl cycles.
    pub sleep_time_s: u32,
    pub last_check_in: Option<DateTime<Utc>>,
    /// Task named by the most recent report, for operator visibility.
    pub last_check_in_task: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A directory subtree a harvester watches, owned by a team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredPathRow {
    pub id: MonitoredPathId,
    pub harvester_id: HarvesterId,
    pub team_id: TeamId,
    /// Absolute root of the watched subtree, as the harvester sees it.
    pub root: String,
    /// Pattern applied to the path relative to `root`. Validated at
    /// creation; a match anywhere in the relative path counts.
    pub regex: String,
    /// Seconds a file's size must hold steady before it is considered
    /// stable enough to import.
    pub stable_time_s: u32,
    /// Row cap per parquet partition for files found under this path.
    pub max_partition_rows: u64,
    pub active: bool,
    pub thresholds: AccessThresholds,
    pub created_at: DateTime<Utc>,
}

/// Primitive column data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int,
    Float,
    Str,
    Bool,
    Datetime,
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::Bool => "bool",
            Self::Datetime => "datetime",
        };
        write!(f, "{name}")
    }
}

/// A physical unit (volts, amps, ...). Global rows have no owning team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataUnitRow {
    pub id: UnitId,
    pub team_id: Option<TeamId>,
    pub name: String,
    pub symbol: String,
    pub description: Option<String>,
    pub thresholds: AccessThresholds,
}

/// A recognized column role (e.g. `Voltage_V`). Global rows have no
/// owning team. Required rows must be present in every usable mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnTypeRow {
    pub id: ColumnTypeId,
    pub team_id: Option<TeamId>,
    pub name: String,
    pub data_type: DataType,
    pub unit_id: Option<UnitId>,
    /// Every usable mapping must assign exactly one column to this type.
    pub is_required: bool,
    pub thresholds: AccessThresholds,
}

/// How one raw column is mapped: target type, optional rename, and an
/// affine rescale applied as `(value + addition) * multiplier`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRule {
    pub column_type: ColumnTypeId,
    /// Output name override. Forbidden for required column types, whose
    /// canonical names are fixed.
    #[serde(default)]
    pub new_name: Option<String>,
    #[serde(default)]
    pub multiplier: Option<f64>,
    #[serde(default)]
    pub addition: Option<f64>,
}

/// A reusable recipe translating raw column names to typed columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMappingRow {
    pub id: MappingId,
    pub team_id: TeamId,
    pub name: String,
    /// Keyed by raw column name as it appears in source files.
    pub entries: BTreeMap<String, ColumnRule>,
    pub thresholds: AccessThresholds,
    pub created_at: DateTime<Utc>,
}

/// Sampled shape of one column: inferred type plus the first few values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub data_type: DataType,
    pub values: Vec<Value>,
}

/// Per-column preview of a file's content, keyed by raw column name.
///
/// Equality is exact and is the identity check for resumed uploads: a
/// payload belongs to a file only if it summarizes to the same value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileSummary(pub BTreeMap<String, ColumnSummary>);

impl FileSummary {
    /// Raw column names present in the summarized file.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn contains_column(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }
}

/// A file observed by a harvester or uploaded directly by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedFileRow {
    pub id: FileId,
    /// Reporting harvester; absent for direct user uploads.
    pub harvester_id: Option<HarvesterId>,
    /// Uploading user; absent for harvester-discovered files.
    pub uploader: Option<UserId>,
    /// Owning team. Harvester files inherit the matched path's team.
    pub team_id: TeamId,
    /// Normalized path on the harvester, or the upload's display name.
    pub path: String,
    /// Monitored paths whose pattern matched this file.
    pub monitored_path_ids: Vec<MonitoredPathId>,
    pub state: FileState,
    pub mapping_id: Option<MappingId>,

    // Metadata reported during import.
    pub name: Option<String>,
    pub parser: Option<String>,
    pub data_generation_date: Option<DateTime<Utc>>,
    pub num_rows: Option<u64>,
    /// Partitions announced for the import, once known.
    pub num_partitions: Option<u64>,
    pub first_sample_no: Option<u64>,
    pub last_sample_no: Option<u64>,
    pub extra_metadata: Option<Value>,

    /// Column preview recorded from the data-summary stage or a direct
    /// upload. Identity anchor for resumed uploads.
    pub summary: Option<FileSummary>,
    /// High-water mark of rows reported by data-summary stages. Progress
    /// reports at or below the mark are no-ops.
    pub rows_reported: u64,

    // Size observations from file_size reports.
    pub last_observed_size_bytes: u64,
    pub last_observed_at: Option<DateTime<Utc>>,

    // Preview image reservation, charged at discovery time.
    pub preview_bytes_reserved: u64,
    pub preview_storage_type: Option<StorageTypeId>,
    pub preview_uploaded: bool,

    /// Errors recorded by failed direct-upload imports.
    pub import_errors: Vec<String>,

    pub thresholds: AccessThresholds,
    pub created_at: DateTime<Utc>,
}

/// One parquet slice of an imported file.
///
/// The row is created (and its bytes reserved against the storage quota)
/// before the payload is written; `uploaded` flips to true only after
/// the backend write succeeds. A row with `uploaded == false` marks an
/// abandoned reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetPartitionRow {
    pub id: PartitionId,
    pub file_id: FileId,
    pub partition_number: u32,
    /// Bytes reserved against the owning storage type's quota.
    pub bytes_required: u64,
    pub storage_type_id: StorageTypeId,
    pub uploaded: bool,
    pub upload_errors: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ParquetPartitionRow {
    /// Artifact key of the partition payload.
    #[must_use]
    pub fn artifact_key(&self) -> String {
        partition_key(self.storage_type_id, self.file_id, self.partition_number)
    }
}

/// Artifact key for a parquet partition payload.
#[must_use]
pub fn partition_key(storage: StorageTypeId, file: FileId, partition_number: u32) -> String {
    format!("storage_{storage}/files/{file}/partition_{partition_number}.parquet")
}

/// Artifact key for a file's PNG preview.
#[must_use]
pub fn preview_key(storage: StorageTypeId, file: FileId) -> String {
    format!("storage_{storage}/files/{file}/preview.png")
}

/// An error reported by (or provoked by) a harvester, kept for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestErrorRow {
    pub id: HarvestErrorId,
    pub harvester_id: HarvesterId,
    pub file_id: Option<FileId>,
    pub error: String,
    pub created_at: DateTime<Utc>,
}

/// A team-owned blob outside the import pipeline (protocols, notes).
/// Its size still counts against the lab's storage quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitraryFileRow {
    pub id: ArbitraryFileId,
    pub team_id: TeamId,
    pub name: String,
    pub description: Option<String>,
    pub bytes_required: u64,
    pub storage_type_id: StorageTypeId,
    pub thresholds: AccessThresholds,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_equality_is_exact() {
        let mut a = BTreeMap::new();
        a.insert(
            "Voltage".to_string(),
            ColumnSummary {
                data_type: DataType::Float,
                values: vec![Value::from(3.7), Value::from(3.71)],
            },
        );
        let left = FileSummary(a.clone());
        let right = FileSummary(a.clone());
        assert_eq!(left, right);

        a.get_mut("Voltage")
            .expect("column present")
            .values
            .push(Value::from(3.72));
        assert_ne!(left, FileSummary(a));
    }

    #[test]
    fn artifact_keys_are_scoped_by_storage_and_file() {
        let storage = StorageTypeId::generate();
        let file = FileId::generate();
        let key = partition_key(storage, file, 3);
        assert!(key.starts_with(&format!("storage_{storage}/files/{file}/")));
        assert!(key.ends_with("partition_3.parquet"));
        assert_ne!(key, preview_key(storage, file));
    }
}
