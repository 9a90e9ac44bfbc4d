//! Error taxonomy of a pipeline run.

use std::path::PathBuf;

use datapipe_api_client::ClientError;
use datapipe_core::{CoreError, StageKind, YearRange};
use datapipe_storage::StorageError;
use thiserror::Error;

pub use datapipe_transform::TransformError;

/// Failure to produce the table for one indicator.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network, status, or response shape failure.
    #[error("indicator {code}: {source}")]
    Api {
        code: String,
        #[source]
        source: ClientError,
    },

    /// A page task panicked or was cancelled.
    #[error("indicator {code}: page task failed: {reason}")]
    PageTask { code: String, reason: String },

    /// Nothing left after filtering to the year range.
    #[error("indicator {code}: no rows within {years}")]
    EmptyTable { code: String, years: YearRange },

    /// CSV encoding or decoding failed.
    #[error("indicator {code}: CSV error: {source}")]
    Csv {
        code: String,
        #[source]
        source: csv::Error,
    },

    /// Writing or reading the table file failed.
    #[error("indicator {code}: I/O error on {}: {source}", path.display())]
    Io {
        code: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The written file does not have the expected shape.
    #[error("indicator {code}: {} failed verification: {reason}", path.display())]
    Verify {
        code: String,
        path: PathBuf,
        reason: String,
    },
}

impl FetchError {
    /// Indicator the failure belongs to.
    pub fn code(&self) -> &str {
        match self {
            Self::Api { code, .. }
            | Self::PageTask { code, .. }
            | Self::EmptyTable { code, .. }
            | Self::Csv { code, .. }
            | Self::Io { code, .. }
            | Self::Verify { code, .. } => code,
        }
    }
}

/// Failure to upload the artifact.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Credential missing or rejected.
    #[error("storage authentication failed: {0}")]
    Auth(String),

    /// The artifact to upload is not on disk.
    #[error("artifact not found: {}", .0.display())]
    MissingArtifact(PathBuf),

    /// Transport failure or rejected upload.
    #[error("upload failed: {0}")]
    Upload(#[source] StorageError),
}

impl From<StorageError> for PublishError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unauthorized { .. }
            | StorageError::MissingCredential
            | StorageError::TokenFile { .. } => Self::Auth(err.to_string()),
            StorageError::MissingFile(path) => Self::MissingArtifact(path),
            other => Self::Upload(other),
        }
    }
}

/// What a single stage attempt can fail with.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Why a run was aborted.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage failed on every attempt.
    #[error("{stage} stage failed after {attempts} attempts: {source}")]
    RetryExhausted {
        stage: StageKind,
        attempts: u32,
        #[source]
        source: StageError,
    },

    /// A stage record refused a lifecycle transition.
    #[error("{stage} stage lifecycle error: {source}")]
    Lifecycle {
        stage: StageKind,
        #[source]
        source: CoreError,
    },
}

impl PipelineError {
    /// Stage that ended the run.
    pub fn stage(&self) -> StageKind {
        match self {
            Self::RetryExhausted { stage, .. } | Self::Lifecycle { stage, .. } => *stage,
        }
    }
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("failed to build API client: {0}")]
    Client(#[from] ClientError),
}
