//! Server configuration.

use serde::{Deserialize, Serialize};

use volta_core::{Error, Result};

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 256 * 1024 * 1024;
const DEFAULT_MAX_PREVIEW_BYTES: u64 = 1024 * 1024;
const DEFAULT_MAX_PARTITION_ROWS: u64 = 100_000;

/// Configuration for the Volta API server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server port.
    pub http_port: u16,

    /// Enable debug mode.
    ///
    /// When enabled the server falls back to in-memory artifact storage
    /// if no storage root is configured, and logs are pretty-printed
    /// instead of JSON.
    pub debug: bool,

    /// Byte cap on request bodies (reports and direct uploads).
    pub max_upload_bytes: u64,

    /// Byte cap on PNG previews; also the amount reserved when a file is
    /// first discovered.
    pub max_preview_bytes: u64,

    /// Row cap per parquet partition for direct uploads.
    pub max_partition_rows: u64,

    /// Directory for the local-disk artifact backend. Required outside
    /// debug mode.
    #[serde(default)]
    pub storage_root: Option<String>,

    /// Optional JSON catalog snapshot to seed the store from at startup.
    #[serde(default)]
    pub catalog_snapshot: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            debug: false,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_preview_bytes: DEFAULT_MAX_PREVIEW_BYTES,
            max_partition_rows: DEFAULT_MAX_PARTITION_ROWS,
            storage_root: None,
            catalog_snapshot: None,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Supported env vars:
    /// - `VOLTA_HTTP_PORT`
    /// - `VOLTA_DEBUG`
    /// - `VOLTA_MAX_UPLOAD_BYTES`
    /// - `VOLTA_MAX_PREVIEW_BYTES`
    /// - `VOLTA_MAX_PARTITION_ROWS`
    /// - `VOLTA_STORAGE_ROOT`
    /// - `VOLTA_CATALOG_SNAPSHOT`
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = env_u16("VOLTA_HTTP_PORT")? {
            config.http_port = port;
        }
        if let Some(debug) = env_bool("VOLTA_DEBUG")? {
            config.debug = debug;
        }
        if let Some(bytes) = env_u64("VOLTA_MAX_UPLOAD_BYTES")? {
            if bytes == 0 {
                return Err(Error::bad_request(
                    "VOLTA_MAX_UPLOAD_BYTES must be greater than 0",
                ));
            }
            config.max_upload_bytes = bytes;
        }
        if let Some(bytes) = env_u64("VOLTA_MAX_PREVIEW_BYTES")? {
            config.max_preview_bytes = bytes;
        }
        if let Some(rows) = env_u64("VOLTA_MAX_PARTITION_ROWS")? {
            if rows == 0 {
                return Err(Error::bad_request(
                    "VOLTA_MAX_PARTITION_ROWS must be greater than 0",
                ));
            }
            config.max_partition_rows = rows;
        }
        config.storage_root = env_string("VOLTA_STORAGE_ROOT");
        config.catalog_snapshot = env_string("VOLTA_CATALOG_SNAPSHOT");

        if !config.debug && config.storage_root.is_none() {
            return Err(Error::bad_request(
                "VOLTA_STORAGE_ROOT is required when VOLTA_DEBUG is not set",
            ));
        }

        Ok(config)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u16(name: &str) -> Result<Option<u16>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u16>()
        .map(Some)
        .map_err(|e| Error::bad_request(format!("{name} must be a u16: {e}")))
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::bad_request(format!("{name} must be a u64: {e}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::bad_request(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    parse_bool(name, &v).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("TEST", "true").unwrap());
        assert!(parse_bool("TEST", "1").unwrap());
        assert!(!parse_bool("TEST", "FALSE").unwrap());
        assert!(!parse_bool("TEST", "no").unwrap());
    }

    #[test]
    fn parse_bool_rejects_garbage() {
        assert!(parse_bool("TEST", "maybe").is_err());
        assert!(parse_bool("TEST", "").is_err());
    }

    #[test]
    fn defaults_cover_local_development() {
        let config = Config::default();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.max_partition_rows, 100_000);
        assert!(config.storage_root.is_none());
    }
}
