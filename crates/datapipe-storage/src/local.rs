//! Filesystem-backed store for dry runs and local deployments.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::error::StorageError;
use crate::{read_local, ObjectStore, StoredObject};

/// Writes objects to `{root}/{bucket}/{key}`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    bucket: String,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    /// Filesystem location of `key`.
    pub fn object_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.join(&self.bucket);
        path.extend(key.split('/').filter(|part| !part.is_empty() && *part != ".."));
        path
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, local_path: &Path, key: &str) -> Result<StoredObject, StorageError> {
        let bytes = read_local(local_path).await?;
        let target = self.object_path(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &bytes).await?;

        info!(path = %target.display(), key = %key, "Object written");
        Ok(StoredObject {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            size_bytes: bytes.len() as u64,
        })
    }
}
