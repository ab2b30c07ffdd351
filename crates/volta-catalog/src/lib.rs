//! Volta domain catalog.
//!
//! The catalog owns everything between the HTTP surface and raw byte
//! storage: the entity rows and their in-memory snapshot store, the
//! observed-file state machine, harvester report ingestion, direct
//! uploads, storage-quota allocation, monitored-path matching, the
//! column-mapping engine, and capability evaluation.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod access;
pub mod allocator;
pub mod entities;
pub mod file_state;
pub mod ingest;
pub mod mapping;
pub mod matcher;
pub mod metrics;
pub mod partition_codec;
pub mod preview;
pub mod store;
pub mod tabular;
pub mod testutil;
pub mod upload;

pub use entities::{
    ArbitraryFileRow, ColumnMappingRow, ColumnRule, ColumnSummary, ColumnTypeRow, DataType,
    DataUnitRow, FileSummary, HarvestErrorRow, HarvesterRow, LabRow, MonitoredPathRow,
    ObservedFileRow, ParquetPartitionRow, StorageKind, StorageTypeRow, TeamRow, UserRow,
};
pub use file_state::FileState;
pub use ingest::{
    DataSummaryReport, FileMetadata, HarvesterReport, ImportStage, IngestConfig, IngestOutcome,
    IngestService, PartitionUpload, ReportStatus, ReportTask, UploadCompletion,
};
pub use store::{Catalog, CatalogStore};
pub use upload::{UploadConfig, UploadOutcome, UploadRequest, UploadService};
