use super::{BlobMeta, ObjectStore, validate_key};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::trace;

/// A directory acting as the bucket.
///
/// Uploads are copied to a sibling staging file and renamed into place, so a reader never
/// observes a half-written object.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem location of `key` inside the bucket.
    pub fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.object_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn download(&self, key: &str, dest: &Path) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        match tokio::fs::copy(&path, dest).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn upload(&self, key: &str, src: &Path, content_type: &str) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut staged = path.clone().into_os_string();
        staged.push(format!(".{}.partial", uuid::Uuid::new_v4().simple()));
        let staged = PathBuf::from(staged);

        if let Err(e) = tokio::fs::copy(src, &staged).await {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&staged, &path).await {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(e.into());
        }
        trace!(key, content_type, "Stored object in directory bucket");
        Ok(())
    }

    async fn metadata(&self, key: &str) -> Result<BlobMeta, StoreError> {
        let path = self.object_path(key)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(BlobMeta {
            last_modified: DateTime::<Utc>::from(meta.modified()?),
            size: meta.len(),
        })
    }
}
