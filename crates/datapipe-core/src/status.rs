//! Status enums for stages and runs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The three stages of a pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Pull indicator pages from the statistics API and write one table per indicator.
    Fetch,
    /// Run the external transform job over the fetched tables.
    Transform,
    /// Upload the consolidated artifact to object storage.
    Publish,
}

impl StageKind {
    /// Stages in the order a run executes them.
    pub const ALL: [StageKind; 3] = [Self::Fetch, Self::Transform, Self::Publish];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Transform => "transform",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one stage within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    /// Stage created but not yet started.
    #[default]
    Pending,
    /// Stage operation is executing.
    Running,
    /// Last attempt failed; waiting out the backoff before the next attempt.
    Retrying,
    /// Stage completed successfully.
    Succeeded,
    /// All attempts failed.
    Failed,
}

impl StageStatus {
    /// Returns true if the stage is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: StageStatus) -> bool {
        use StageStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Retrying, Running)
                | (Running, Succeeded)
                | (Running, Retrying)
                | (Running, Failed)
        )
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Retrying => "RETRYING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Status of a whole pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run is executing its stages.
    #[default]
    Running,
    /// Every stage succeeded.
    Succeeded,
    /// A stage exhausted its attempts.
    Failed,
}

impl RunStatus {
    /// Returns true if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}
