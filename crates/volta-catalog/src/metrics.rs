//! Ingestion metrics.
//!
//! Counters for the report pipeline and storage allocator. These
//! complement the structured logging approach already in place.

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Harvester reports processed, labelled by task.
pub const REPORTS_TOTAL: &str = "volta_reports_total";

/// Reports rejected before any state change, labelled by reason.
pub const REPORTS_REJECTED: &str = "volta_reports_rejected_total";

/// Harvest errors recorded.
pub const HARVEST_ERRORS: &str = "volta_harvest_errors_total";

/// Files that reached the IMPORTED state.
pub const IMPORTS_COMPLETED: &str = "volta_imports_completed_total";

/// Files that entered the IMPORT_FAILED state.
pub const IMPORTS_FAILED: &str = "volta_imports_failed_total";

/// Bytes reserved against storage quotas.
pub const BYTES_RESERVED: &str = "volta_storage_bytes_reserved_total";

/// Reservations refused because every storage type was full or disabled.
pub const RESERVATIONS_REFUSED: &str = "volta_storage_reservations_refused_total";

/// Partition payload size histogram.
pub const PARTITION_BYTES: &str = "volta_partition_bytes";

/// Registers all metric descriptions.
///
/// Call this once at application startup after initializing the metrics
/// recorder.
pub fn register_metrics() {
    describe_counter!(REPORTS_TOTAL, "Total harvester reports processed");
    describe_counter!(REPORTS_REJECTED, "Total reports rejected without state change");
    describe_counter!(HARVEST_ERRORS, "Total harvest errors recorded");
    describe_counter!(IMPORTS_COMPLETED, "Total files imported successfully");
    describe_counter!(IMPORTS_FAILED, "Total files whose import failed");
    describe_counter!(BYTES_RESERVED, "Total bytes reserved against storage quotas");
    describe_counter!(
        RESERVATIONS_REFUSED,
        "Total storage reservations refused for lack of quota"
    );
    describe_histogram!(PARTITION_BYTES, "Size of uploaded parquet partitions in bytes");
}

/// Records a processed report.
pub fn record_report(task: &str) {
    counter!(REPORTS_TOTAL, "task" => task.to_string()).increment(1);
}

/// Records a rejected report.
pub fn record_report_rejected(reason: &str) {
    counter!(REPORTS_REJECTED, "reason" => reason.to_string()).increment(1);
}

/// Records a harvest error row.
pub fn record_harvest_error() {
    counter!(HARVEST_ERRORS).increment(1);
}

/// Records a completed import.
pub fn record_import_completed() {
    counter!(IMPORTS_COMPLETED).increment(1);
}

/// Records a failed import.
pub fn record_import_failed() {
    counter!(IMPORTS_FAILED).increment(1);
}

/// Records a successful storage reservation.
pub fn record_reservation(bytes: u64) {
    counter!(BYTES_RESERVED).increment(bytes);
    histogram!(PARTITION_BYTES).record(bytes as f64);
}

/// Records a refused storage reservation.
pub fn record_reservation_refused() {
    counter!(RESERVATIONS_REFUSED).increment(1);
}
