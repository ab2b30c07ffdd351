//! Storage backend abstraction for artifact payloads.
//!
//! Committed artifacts (parquet partitions, preview images, arbitrary
//! files) are immutable blobs: they are written once and either read back
//! or deleted. The contract is therefore deliberately narrower than a
//! general object store: no versioning, no conditional writes.
//!
//! Quota accounting does NOT live here: byte budgets are enforced by the
//! catalog's storage allocator over row metadata. Backends only move bytes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};

/// Metadata about a stored artifact.
#[derive(Debug, Clone)]
pub struct ArtifactMeta {
    /// Artifact key (relative path).
    pub key: String,
    /// Artifact size in bytes.
    pub size: u64,
}

/// Storage backend trait for artifact payloads.
///
/// Keys are `/`-separated relative paths scoped by the caller (e.g.
/// `storage_{id}/files/{file_id}/partition_0.parquet`).
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Writes an artifact, replacing any existing artifact at the key.
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Reads an entire artifact.
    ///
    /// Returns `Error::NotFound` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Deletes an artifact. Idempotent: succeeds if the key doesn't exist.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Lists artifacts under the given prefix, in arbitrary order.
    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactMeta>>;

    /// Returns metadata without reading content, or `None` if absent.
    async fn head(&self, key: &str) -> Result<Option<ArtifactMeta>>;
}

/// In-memory storage backend for testing and local development.
///
/// Thread-safe via `RwLock`. Not suitable for production.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| Error::internal("lock poisoned"))?
            .insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.objects
            .read()
            .map_err(|_| Error::internal("lock poisoned"))?
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found("artifact", key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| Error::internal("lock poisoned"))?
            .remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactMeta>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| Error::internal("lock poisoned"))?;
        Ok(objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| ArtifactMeta {
                key: k.clone(),
                size: v.len() as u64,
            })
            .collect())
    }

    async fn head(&self, key: &str) -> Result<Option<ArtifactMeta>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| Error::internal("lock poisoned"))?;
        Ok(objects.get(key).map(|v| ArtifactMeta {
            key: key.to_string(),
            size: v.len() as u64,
        }))
    }
}

/// Storage backend writing artifacts to a local directory.
///
/// Keys map directly to paths under the root. Keys containing `..` are
/// rejected to keep artifacts inside the root.
#[derive(Debug, Clone)]
pub struct LocalDiskBackend {
    root: PathBuf,
}

impl LocalDiskBackend {
    /// Creates a backend rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.starts_with('/') {
            return Err(Error::bad_request(format!(
                "artifact key must be a non-empty relative path: '{key}'"
            )));
        }
        if key.split('/').any(|part| part == "..") {
            return Err(Error::bad_request(format!(
                "artifact key must not contain '..': '{key}'"
            )));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl StorageBackend for LocalDiskBackend {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage_with_source(format!("create dir for '{key}'"), e))?;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| Error::storage_with_source(format!("write artifact '{key}'"), e))
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found("artifact", key))
            }
            Err(e) => Err(Error::storage_with_source(
                format!("read artifact '{key}'"),
                e,
            )),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage_with_source(
                format!("delete artifact '{key}'"),
                e,
            )),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactMeta>> {
        let mut results = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::storage_with_source("list artifacts", e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::storage_with_source("list artifacts", e))?
            {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative.to_string_lossy().replace('\\', "/");
                if !key.starts_with(prefix) {
                    continue;
                }
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| Error::storage_with_source("stat artifact", e))?;
                results.push(ArtifactMeta {
                    key,
                    size: meta.len(),
                });
            }
        }
        Ok(results)
    }

    async fn head(&self, key: &str) -> Result<Option<ArtifactMeta>> {
        let path = self.resolve(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(Some(ArtifactMeta {
                key: key.to_string(),
                size: meta.len(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage_with_source(
                format!("stat artifact '{key}'"),
                e,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_roundtrip() {
        let backend = MemoryBackend::new();
        let data = Bytes::from("partition bytes");

        backend
            .put("storage_a/files/f1/partition_0.parquet", data.clone())
            .await
            .expect("put should succeed");

        let read = backend
            .get("storage_a/files/f1/partition_0.parquet")
            .await
            .expect("get should succeed");
        assert_eq!(read, data);

        let meta = backend
            .head("storage_a/files/f1/partition_0.parquet")
            .await
            .expect("head should succeed")
            .expect("artifact should exist");
        assert_eq!(meta.size, data.len() as u64);
    }

    #[tokio::test]
    async fn memory_backend_get_missing_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.get("nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn memory_backend_delete_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.put("a", Bytes::from("x")).await.unwrap();
        backend.delete("a").await.expect("first delete");
        backend.delete("a").await.expect("second delete");
        assert!(backend.head("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_backend_list_filters_by_prefix() {
        let backend = MemoryBackend::new();
        backend.put("a/1", Bytes::from("1")).await.unwrap();
        backend.put("a/2", Bytes::from("22")).await.unwrap();
        backend.put("b/1", Bytes::from("333")).await.unwrap();

        let listed = backend.list("a/").await.expect("list should succeed");
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn local_backend_rejects_traversal() {
        let backend = LocalDiskBackend::new(std::env::temp_dir().join("volta-test-root"));
        let err = backend.get("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }
}
