//! In-memory catalog store.
//!
//! The whole catalog is one snapshot value behind a lock. Writers clone
//! the snapshot, apply their changes to the clone, and swap it back in
//! only on success, so a failed transaction leaves no partial state and
//! check-then-act sequences (quota checks especially) are serialized
//! against every other write.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use volta_core::{
    ArbitraryFileId, ColumnTypeId, Error, FileId, HarvesterId, LabId, MappingId, MonitoredPathId,
    PartitionId, Result, StorageTypeId, TeamId, UnitId, UserId,
};

use crate::entities::{
    ArbitraryFileRow, ColumnMappingRow, ColumnTypeRow, DataUnitRow, HarvestErrorRow, HarvesterRow,
    LabRow, MonitoredPathRow, ObservedFileRow, ParquetPartitionRow, StorageTypeRow, TeamRow,
    UserRow,
};

/// One consistent snapshot of every catalog table.
///
/// Serializable so deployments can seed a server from a snapshot file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub labs: BTreeMap<LabId, LabRow>,
    pub teams: BTreeMap<TeamId, TeamRow>,
    pub users: BTreeMap<UserId, UserRow>,
    pub storage_types: BTreeMap<StorageTypeId, StorageTypeRow>,
    pub harvesters: BTreeMap<HarvesterId, HarvesterRow>,
    pub monitored_paths: BTreeMap<MonitoredPathId, MonitoredPathRow>,
    pub files: BTreeMap<FileId, ObservedFileRow>,
    pub mappings: BTreeMap<MappingId, ColumnMappingRow>,
    pub column_types: BTreeMap<ColumnTypeId, ColumnTypeRow>,
    pub units: BTreeMap<UnitId, DataUnitRow>,
    pub partitions: BTreeMap<PartitionId, ParquetPartitionRow>,
    pub harvest_errors: Vec<HarvestErrorRow>,
    pub arbitrary_files: BTreeMap<ArbitraryFileId, ArbitraryFileRow>,
}

impl Catalog {
    /// Looks up an active harvester by its API key.
    pub fn harvester_by_key(&self, api_key: &str) -> Result<&HarvesterRow> {
        let harvester = self
            .harvesters
            .values()
            .find(|h| h.api_key == api_key)
            .ok_or_else(|| Error::unauthorized("unknown harvester API key"))?;
        if !harvester.active {
            return Err(Error::unauthorized(format!(
                "harvester '{}' is deactivated",
                harvester.name
            )));
        }
        Ok(harvester)
    }

    /// Looks up an active user by bearer token.
    pub fn user_by_token(&self, token: &str) -> Result<&UserRow> {
        let user = self
            .users
            .values()
            .find(|u| u.api_token.as_deref() == Some(token))
            .ok_or_else(|| Error::unauthorized("unknown bearer token"))?;
        if !user.active {
            return Err(Error::unauthorized(format!(
                "user '{}' is deactivated",
                user.username
            )));
        }
        Ok(user)
    }

    pub fn lab(&self, id: LabId) -> Result<&LabRow> {
        self.labs.get(&id).ok_or_else(|| Error::not_found("Lab", id))
    }

    pub fn team(&self, id: TeamId) -> Result<&TeamRow> {
        self.teams
            .get(&id)
            .ok_or_else(|| Error::not_found("Team", id))
    }

    pub fn harvester(&self, id: HarvesterId) -> Result<&HarvesterRow> {
        self.harvesters
            .get(&id)
            .ok_or_else(|| Error::not_found("Harvester", id))
    }

    pub fn monitored_path(&self, id: MonitoredPathId) -> Result<&MonitoredPathRow> {
        self.monitored_paths
            .get(&id)
            .ok_or_else(|| Error::not_found("MonitoredPath", id))
    }

    pub fn file(&self, id: FileId) -> Result<&ObservedFileRow> {
        self.files
            .get(&id)
            .ok_or_else(|| Error::not_found("ObservedFile", id))
    }

    pub fn file_mut(&mut self, id: FileId) -> Result<&mut ObservedFileRow> {
        self.files
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("ObservedFile", id))
    }

    pub fn mapping(&self, id: MappingId) -> Result<&ColumnMappingRow> {
        self.mappings
            .get(&id)
            .ok_or_else(|| Error::not_found("ColumnMapping", id))
    }

    pub fn column_type(&self, id: ColumnTypeId) -> Result<&ColumnTypeRow> {
        self.column_types
            .get(&id)
            .ok_or_else(|| Error::not_found("ColumnType", id))
    }

    pub fn storage_type(&self, id: StorageTypeId) -> Result<&StorageTypeRow> {
        self.storage_types
            .get(&id)
            .ok_or_else(|| Error::not_found("StorageType", id))
    }

    /// The file a harvester has previously reported at a normalized path.
    pub fn file_by_harvester_path(
        &self,
        harvester_id: HarvesterId,
        normalized_path: &str,
    ) -> Option<&ObservedFileRow> {
        self.files
            .values()
            .find(|f| f.harvester_id == Some(harvester_id) && f.path == normalized_path)
    }

    /// Partitions of a file ordered by partition number.
    pub fn partitions_of(&self, file_id: FileId) -> Vec<&ParquetPartitionRow> {
        let mut rows: Vec<_> = self
            .partitions
            .values()
            .filter(|p| p.file_id == file_id)
            .collect();
        rows.sort_by_key(|p| p.partition_number);
        rows
    }

    /// Monitored paths attached to a harvester.
    pub fn paths_of_harvester(&self, harvester_id: HarvesterId) -> Vec<&MonitoredPathRow> {
        self.monitored_paths
            .values()
            .filter(|p| p.harvester_id == harvester_id)
            .collect()
    }

    /// Validates a catalog before it is served, so a snapshot with a
    /// malformed monitored-path pattern is rejected at load time instead
    /// of silently matching nothing.
    pub fn validate(&self) -> Result<()> {
        for path in self.monitored_paths.values() {
            crate::matcher::validate_regex(&path.regex).map_err(|e| {
                Error::bad_request(format!("monitored path {}: {e}", path.id))
            })?;
        }
        Ok(())
    }
}

/// Shared handle to the catalog.
#[derive(Debug, Default)]
pub struct CatalogStore {
    inner: RwLock<Catalog>,
}

impl CatalogStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store from a prepared snapshot.
    #[must_use]
    pub fn with_catalog(catalog: Catalog) -> Self {
        Self {
            inner: RwLock::new(catalog),
        }
    }

    /// Runs a read-only closure against the current snapshot.
    pub fn read<T>(&self, f: impl FnOnce(&Catalog) -> Result<T>) -> Result<T> {
        let guard = self
            .inner
            .read()
            .map_err(|_| Error::internal("catalog lock poisoned"))?;
        f(&guard)
    }

    /// Runs a mutating closure transactionally.
    ///
    /// The closure works on a clone of the snapshot; it becomes visible
    /// only if the closure succeeds. The write lock is held for the whole
    /// transaction, so reads made inside the closure cannot be invalidated
    /// by concurrent writers.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Catalog) -> Result<T>) -> Result<T> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| Error::internal("catalog lock poisoned"))?;
        let mut working = guard.clone();
        let out = f(&mut working)?;
        *guard = working;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn failed_transaction_leaves_no_partial_state() {
        let fixture = testutil::Fixture::new();
        let store = CatalogStore::with_catalog(fixture.catalog);
        let harvester_id = fixture.harvester_id;

        let result: Result<()> = store.transaction(|catalog| {
            catalog
                .harvesters
                .get_mut(&harvester_id)
                .expect("harvester exists")
                .active = false;
            Err(Error::bad_request("abort"))
        });
        assert!(result.is_err());

        store
            .read(|catalog| {
                assert!(catalog.harvester(harvester_id)?.active);
                Ok(())
            })
            .expect("read");
    }

    #[test]
    fn committed_transaction_is_visible() {
        let fixture = testutil::Fixture::new();
        let store = CatalogStore::with_catalog(fixture.catalog);
        let harvester_id = fixture.harvester_id;

        store
            .transaction(|catalog| {
                catalog
                    .harvesters
                    .get_mut(&harvester_id)
                    .ok_or_else(|| Error::not_found("Harvester", harvester_id))?
                    .sleep_time_s = 120;
                Ok(())
            })
            .expect("transaction");

        store
            .read(|catalog| {
                assert_eq!(catalog.harvester(harvester_id)?.sleep_time_s, 120);
                Ok(())
            })
            .expect("read");
    }

    #[test]
    fn snapshot_with_malformed_path_pattern_fails_validation() {
        let mut fixture = testutil::Fixture::new();
        fixture.catalog.validate().expect("fixture is well-formed");

        fixture
            .catalog
            .monitored_paths
            .get_mut(&fixture.path_id)
            .expect("path exists")
            .regex = "([unclosed".to_string();
        let err = fixture.catalog.validate().unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }), "{err}");
    }

    #[test]
    fn inactive_harvester_key_is_unauthorized() {
        let mut fixture = testutil::Fixture::new();
        let harvester_id = fixture.harvester_id;
        fixture
            .catalog
            .harvesters
            .get_mut(&harvester_id)
            .expect("harvester exists")
            .active = false;

        let err = fixture
            .catalog
            .harvester_by_key(testutil::HARVESTER_KEY)
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized { .. }));
    }
}
