//! Transform stage: run the opaque job over the fetched tables.

use std::path::PathBuf;

use async_trait::async_trait;
use datapipe_core::{Artifact, StageKind};
use datapipe_transform::JobExecutor;
use tracing::info;

use super::{RunContext, Stage};
use crate::error::StageError;

pub struct Transformer {
    executor: JobExecutor,
}

impl Transformer {
    pub fn new(executor: JobExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &JobExecutor {
        &self.executor
    }
}

#[async_trait]
impl Stage for Transformer {
    type Input = Vec<PathBuf>;
    type Output = Artifact;

    fn kind(&self) -> StageKind {
        StageKind::Transform
    }

    async fn run(&self, ctx: &RunContext, inputs: &Vec<PathBuf>) -> Result<Artifact, StageError> {
        let result = self.executor.execute(inputs).await?;
        info!(
            run_id = %ctx.run_id,
            artifact = %result.artifact.path().display(),
            duration_ms = result.duration.as_millis() as u64,
            "Transform produced artifact"
        );
        Ok(result.artifact)
    }
}
