//! Object storage targets for the published artifact.
//!
//! Objects are addressed by `(bucket, key)`. Writing to an existing key
//! replaces the object, so re-publishing for the same date never creates
//! a second copy.

pub mod error;
pub mod gcs;
pub mod local;

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

pub use error::StorageError;
pub use gcs::GcsStore;
pub use local::LocalStore;

/// An object that was written to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub size_bytes: u64,
}

/// Upload sink keyed by object name.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket this store writes into.
    fn bucket(&self) -> &str;

    /// Upload the file at `local_path` under `key`, replacing any existing object.
    async fn put(&self, local_path: &Path, key: &str) -> Result<StoredObject, StorageError>;
}

/// Read a local file, mapping a missing file to [`StorageError::MissingFile`].
pub(crate) async fn read_local(path: &Path) -> Result<Vec<u8>, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StorageError::MissingFile(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}
