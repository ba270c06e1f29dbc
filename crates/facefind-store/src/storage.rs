//! Object storage for uploaded photo bytes.

use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object already exists: {0}")]
    Exists(String),
    #[error("invalid object path: {0}")]
    InvalidPath(String),
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Write-once blob store addressed by relative path.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` at `path` and return a URL that serves them.
    /// Fails if the path is already occupied.
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<String, StorageError>;
}

/// Object storage on the local filesystem, rooted at one directory.
pub struct FsObjectStorage {
    root: PathBuf,
}

impl FsObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(path);
        let clean = !path.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = match tokio::fs::OpenOptions::new().write(true).create_new(true).open(&full).await {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StorageError::Exists(path.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&bytes).await?;
        file.flush().await?;

        tracing::debug!(path, bytes = bytes.len(), "object stored");
        Ok(format!("file://{}", full.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_writes_and_returns_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsObjectStorage::new(dir.path());

        let url = storage.put("agency_uploads/op/ev/1_a.jpg", b"jpeg".to_vec()).await.unwrap();
        let on_disk = dir.path().join("agency_uploads/op/ev/1_a.jpg");
        assert_eq!(url, format!("file://{}", on_disk.display()));
        assert_eq!(std::fs::read(on_disk).unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn test_put_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsObjectStorage::new(dir.path());
        storage.put("a/b.jpg", vec![1]).await.unwrap();

        let err = storage.put("a/b.jpg", vec![2]).await.unwrap_err();
        assert!(matches!(err, StorageError::Exists(_)));
        assert_eq!(std::fs::read(dir.path().join("a/b.jpg")).unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_put_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsObjectStorage::new(dir.path());
        for bad in ["../x.jpg", "/etc/x.jpg", "a/../../x.jpg", ""] {
            let err = storage.put(bad, vec![0]).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidPath(_)), "{bad}");
        }
    }
}
