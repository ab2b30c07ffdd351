//! Storage-quota accounting and allocation.
//!
//! Usage is never cached: every allocation decision sums the live
//! reservations (parquet partitions, preview images, arbitrary files)
//! against each storage type inside the same catalog transaction that
//! records the new reservation, so two concurrent reservations cannot
//! both squeeze under the quota.

use volta_core::{Error, LabId, Result, StorageTypeId};

use crate::entities::StorageTypeRow;
use crate::store::Catalog;

/// Bytes currently reserved against a storage type.
#[must_use]
pub fn used_bytes(catalog: &Catalog, storage_type_id: StorageTypeId) -> u64 {
    let partitions: u64 = catalog
        .partitions
        .values()
        .filter(|p| p.storage_type_id == storage_type_id)
        .map(|p| p.bytes_required)
        .sum();
    let previews: u64 = catalog
        .files
        .values()
        .filter(|f| f.preview_storage_type == Some(storage_type_id))
        .map(|f| f.preview_bytes_reserved)
        .sum();
    let arbitrary: u64 = catalog
        .arbitrary_files
        .values()
        .filter(|a| a.storage_type_id == storage_type_id)
        .map(|a| a.bytes_required)
        .sum();
    partitions + previews + arbitrary
}

/// A lab's storage types in allocation order: ascending priority, then
/// creation time, then id, so the order is total and deterministic.
#[must_use]
pub fn storage_types_for_lab(catalog: &Catalog, lab_id: LabId) -> Vec<&StorageTypeRow> {
    let mut rows: Vec<_> = catalog
        .storage_types
        .values()
        .filter(|s| s.lab_id == lab_id)
        .collect();
    rows.sort_by_key(|s| (s.priority, s.created_at, s.id.as_uuid()));
    rows
}

/// Picks the storage type a new reservation of `requested_bytes` should
/// land on, with `exclude_bytes` already-held bytes discounted (used when
/// a reservation replaces an older one on the same storage type).
///
/// Storage types are tried in allocation order; the first enabled one
/// where `used + requested <= quota` wins. When none fits, the error
/// lists why each candidate was skipped.
pub fn reserve(
    catalog: &Catalog,
    lab_id: LabId,
    requested_bytes: u64,
    exclude: Option<(StorageTypeId, u64)>,
) -> Result<StorageTypeId> {
    let lab = catalog.lab(lab_id)?;
    let span = volta_core::observability::allocation_span(&lab.name, requested_bytes);
    let _guard = span.enter();

    let mut refusals = Vec::new();
    for storage in storage_types_for_lab(catalog, lab_id) {
        if !storage.enabled {
            refusals.push(format!("'{}' is disabled", storage.name));
            continue;
        }
        let mut used = used_bytes(catalog, storage.id);
        if let Some((excluded_id, excluded_bytes)) = exclude {
            if excluded_id == storage.id {
                used = used.saturating_sub(excluded_bytes);
            }
        }
        if used.saturating_add(requested_bytes) <= storage.quota_bytes {
            tracing::debug!(
                storage = %storage.id,
                used_bytes = used,
                quota_bytes = storage.quota_bytes,
                "reservation placed"
            );
            return Ok(storage.id);
        }
        refusals.push(format!(
            "'{}' would exceed its quota ({used} of {} bytes used)",
            storage.name, storage.quota_bytes
        ));
    }
    if refusals.is_empty() {
        refusals.push("the lab has no storage types".to_string());
    }
    tracing::warn!(lab = %lab_id, requested_bytes, "no storage type can take the reservation");
    Err(Error::insufficient_storage(
        requested_bytes,
        refusals.join("; "),
    ))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use volta_core::FileId;

    use super::*;
    use crate::entities::{ParquetPartitionRow, StorageKind, StorageTypeRow};
    use crate::testutil::Fixture;

    fn add_partition(catalog: &mut Catalog, storage: StorageTypeId, bytes: u64) {
        let id = volta_core::PartitionId::generate();
        catalog.partitions.insert(
            id,
            ParquetPartitionRow {
                id,
                file_id: FileId::generate(),
                partition_number: 0,
                bytes_required: bytes,
                storage_type_id: storage,
                uploaded: true,
                upload_errors: Vec::new(),
                created_at: Utc::now(),
            },
        );
    }

    #[test]
    fn usage_is_summed_on_demand() {
        let mut f = Fixture::new();
        assert_eq!(used_bytes(&f.catalog, f.storage_id), 0);
        add_partition(&mut f.catalog, f.storage_id, 1_000);
        add_partition(&mut f.catalog, f.storage_id, 500);
        assert_eq!(used_bytes(&f.catalog, f.storage_id), 1_500);
    }

    #[test]
    fn fill_to_exact_quota_is_allowed() {
        let f = Fixture::with_quota(1_000);
        let chosen = reserve(&f.catalog, f.lab_id, 1_000, None).expect("exact fit");
        assert_eq!(chosen, f.storage_id);
    }

    #[test]
    fn one_byte_over_quota_is_refused() {
        let f = Fixture::with_quota(1_000);
        let err = reserve(&f.catalog, f.lab_id, 1_001, None).unwrap_err();
        assert!(err.is_insufficient_storage());
        assert!(err.to_string().contains("managed"));
    }

    #[test]
    fn lower_priority_is_tried_first() {
        let mut f = Fixture::with_quota(100);
        add_partition(&mut f.catalog, f.storage_id, 100);

        let overflow_id = StorageTypeId::generate();
        f.catalog.storage_types.insert(
            overflow_id,
            StorageTypeRow {
                id: overflow_id,
                lab_id: f.lab_id,
                name: "overflow".to_string(),
                kind: StorageKind::Managed,
                quota_bytes: 10_000,
                priority: 5,
                enabled: true,
                created_at: Utc::now(),
            },
        );

        // Primary (priority 0) is full; the priority-5 overflow takes it.
        let chosen = reserve(&f.catalog, f.lab_id, 50, None).expect("overflow has room");
        assert_eq!(chosen, overflow_id);

        // With the primary drained, it wins again.
        f.catalog.partitions.clear();
        let chosen = reserve(&f.catalog, f.lab_id, 50, None).expect("primary has room");
        assert_eq!(chosen, f.storage_id);
    }

    #[test]
    fn disabled_storage_is_skipped_with_a_reason() {
        let mut f = Fixture::new();
        f.catalog
            .storage_types
            .get_mut(&f.storage_id)
            .expect("storage exists")
            .enabled = false;

        let err = reserve(&f.catalog, f.lab_id, 10, None).unwrap_err();
        assert!(err.is_insufficient_storage());
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn replacement_discounts_the_old_reservation() {
        let f = Fixture::with_quota(1_000);
        let mut catalog = f.catalog;
        add_partition(&mut catalog, f.storage_id, 900);

        // 900 used of 1000; a fresh 200 does not fit...
        assert!(reserve(&catalog, f.lab_id, 200, None).is_err());
        // ...but replacing the 900-byte reservation with 200 does.
        let chosen = reserve(&catalog, f.lab_id, 200, Some((f.storage_id, 900)))
            .expect("replacement fits");
        assert_eq!(chosen, f.storage_id);
    }
}
