//! Scoped temporary storage for in-flight upload payloads.
//!
//! Raw file payloads are spooled to a local temporary file while they are
//! summarized or mapped, and the spool is removed on every exit path,
//! including errors and panics (cleanup runs in `Drop`).

use std::path::{Path, PathBuf};

use bytes::Bytes;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A temporary on-disk copy of an uploaded payload.
///
/// The backing file is deleted when the spool is dropped.
#[derive(Debug)]
pub struct PayloadSpool {
    path: PathBuf,
}

impl PayloadSpool {
    /// Spools the payload to a uniquely-named file under the system
    /// temporary directory.
    pub fn write(payload: &Bytes) -> Result<Self> {
        let path = std::env::temp_dir().join(format!("volta-upload-{}", Uuid::new_v4()));
        std::fs::write(&path, payload)
            .map_err(|e| Error::storage_with_source("spool upload payload", e))?;
        Ok(Self { path })
    }

    /// Path of the spooled payload.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PayloadSpool {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove upload spool");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spool_is_removed_on_drop() {
        let payload = Bytes::from("a,b\n1,2\n");
        let path;
        {
            let spool = PayloadSpool::write(&payload).expect("spool should succeed");
            path = spool.path().to_path_buf();
            assert!(path.exists());
            assert_eq!(std::fs::read(&path).expect("read spool"), payload);
        }
        assert!(!path.exists(), "spool must be deleted when dropped");
    }

    #[test]
    fn spool_is_removed_even_when_processing_fails() {
        let payload = Bytes::from("payload");
        let path;
        let result: std::result::Result<(), &str> = {
            let spool = PayloadSpool::write(&payload).expect("spool should succeed");
            path = spool.path().to_path_buf();
            Err("simulated import failure")
        };
        assert!(result.is_err());
        assert!(!path.exists());
    }
}
