//! Shared types for the Volta battery-data platform.
//!
//! This crate holds the vocabulary that all other Volta crates speak:
//! the error taxonomy, strongly-typed entity identifiers, access-level
//! primitives, the artifact storage backend contract, and logging setup.
//! It contains no coordination logic of its own.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod access;
pub mod error;
pub mod id;
pub mod observability;
pub mod spool;
pub mod storage;

pub use access::{AccessKind, AccessLevel, AccessThresholds, PermissionFlags, Principal};
pub use error::{Error, Result};
pub use id::{
    ArbitraryFileId, ColumnTypeId, FileId, HarvestErrorId, HarvesterId, LabId, MappingId,
    MonitoredPathId, PartitionId, StorageTypeId, TeamId, UnitId, UserId,
};
pub use spool::PayloadSpool;
pub use storage::{ArtifactMeta, LocalDiskBackend, MemoryBackend, StorageBackend};
