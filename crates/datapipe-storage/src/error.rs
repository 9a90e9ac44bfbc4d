//! Error types for object storage.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when uploading to storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store rejected the credential.
    #[error("storage rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    /// No credential was configured for a store that needs one.
    #[error("no storage credential configured")]
    MissingCredential,

    /// The token file could not be read.
    #[error("cannot read token file {path}: {source}")]
    TokenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The store answered with another non-success status.
    #[error("upload rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The local file to upload does not exist.
    #[error("local file not found: {0}")]
    MissingFile(PathBuf),

    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
