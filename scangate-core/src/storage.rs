//! Content-addressed file storage boundary.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, ScanGateError};

/// Metadata returned after persisting an upload.
#[derive(Clone, Debug)]
pub struct StoredFile {
    pub stored_ref: String,
    pub size: u64,
    pub checksum: String,
}

/// Storage consumed by the pipeline; referenced by content address.
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn save(&self, data: &[u8], original_name: &str) -> Result<StoredFile>;

    async fn exists(&self, stored_ref: &str) -> Result<bool>;

    async fn read(&self, stored_ref: &str) -> Result<Vec<u8>>;

    async fn delete(&self, stored_ref: &str) -> Result<()>;
}

/// Filesystem-backed storage. Files are addressed by their sha256 hex
/// digest and fanned out over a two-level directory shard.
#[derive(Clone, Debug)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a content address to its on-disk path, rejecting anything
    /// that is not a plain hex digest (no traversal through refs).
    fn resolve(&self, stored_ref: &str) -> Result<PathBuf> {
        if stored_ref.len() != 64 || !stored_ref.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ScanGateError::Storage(format!(
                "malformed stored reference: {stored_ref}"
            )));
        }
        Ok(self
            .root
            .join(&stored_ref[0..2])
            .join(&stored_ref[2..4])
            .join(stored_ref))
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ScanGateError::Storage(format!("create {}: {e}", parent.display())))?;
        }
        Ok(())
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn save(&self, data: &[u8], original_name: &str) -> Result<StoredFile> {
        let checksum = hex::encode(Sha256::digest(data));
        let path = self.resolve(&checksum)?;
        Self::ensure_parent(&path).await?;

        // Same digest means same content; rewriting is harmless and keeps
        // the operation idempotent.
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| ScanGateError::Storage(format!("write {}: {e}", path.display())))?;

        debug!(stored_ref = %checksum, original_name, size = data.len(), "file stored");
        Ok(StoredFile {
            stored_ref: checksum.clone(),
            size: data.len() as u64,
            checksum,
        })
    }

    async fn exists(&self, stored_ref: &str) -> Result<bool> {
        let path = self.resolve(stored_ref)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| ScanGateError::Storage(format!("stat {}: {e}", path.display())))
    }

    async fn read(&self, stored_ref: &str) -> Result<Vec<u8>> {
        let path = self.resolve(stored_ref)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ScanGateError::FileMissing(stored_ref.to_string()))
            }
            Err(e) => Err(ScanGateError::Storage(format!(
                "read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn delete(&self, stored_ref: &str) -> Result<()> {
        let path = self.resolve(stored_ref)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ScanGateError::Storage(format!(
                "delete {}: {e}",
                path.display()
            ))),
        }
    }
}
