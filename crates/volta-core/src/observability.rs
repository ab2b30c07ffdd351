//! Observability infrastructure for Volta.
//!
//! Structured logging with consistent spans: JSON output in production,
//! pretty output for development. Components wrap their units of work in
//! the span constructors below so harvester/path context is attached to
//! every log line.

use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops. Levels are controlled by `RUST_LOG`
/// (e.g. `info`, `volta_catalog=debug`).
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for report-ingestion operations.
#[must_use]
pub fn ingest_span(operation: &str, harvester: &str, path: &str) -> Span {
    tracing::info_span!(
        "ingest",
        op = operation,
        harvester = harvester,
        path = path,
    )
}

/// Creates a span for storage-allocation decisions.
#[must_use]
pub fn allocation_span(lab: &str, requested_bytes: u64) -> Span {
    tracing::info_span!("allocate", lab = lab, requested_bytes = requested_bytes)
}
