//! Error types for transform job execution.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while running the transform job.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Failed to spawn the job process.
    #[error("failed to spawn transform job '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O failure around the job (waiting, clearing a stale artifact).
    #[error("transform job I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A declared input file does not exist.
    #[error("transform input not found: {0}")]
    MissingInput(PathBuf),

    /// The job exited unsuccessfully.
    #[error("transform job exited with code {exit_code}: {stderr_tail}")]
    JobFailed { exit_code: i32, stderr_tail: String },

    /// The job did not finish within its time budget.
    #[error("transform job timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The job exited successfully but left no artifact.
    #[error("transform job finished but artifact is missing: {0}")]
    ArtifactMissing(PathBuf),
}
