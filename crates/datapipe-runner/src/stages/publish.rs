//! Publish stage: upload the artifact under a key derived from the run date.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use datapipe_core::policy::{ARTIFACT_NAME, REMOTE_DATE_FORMAT};
use datapipe_core::{Artifact, StageKind};
use datapipe_storage::{ObjectStore, StoredObject};
use tracing::info;

use super::{RunContext, Stage};
use crate::error::{PublishError, StageError};

/// Remote key for an artifact published on `date`, e.g. `04-03-2024/world_data.csv`.
///
/// The key depends only on the date, so every run on the same day writes
/// the same object.
pub fn remote_key(date: NaiveDate, object_name: &str) -> String {
    format!("{}/{}", date.format(REMOTE_DATE_FORMAT), object_name)
}

pub struct Publisher {
    store: Arc<dyn ObjectStore>,
    object_name: String,
}

impl Publisher {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            object_name: ARTIFACT_NAME.to_string(),
        }
    }

    /// Builder method to override the object name under the date prefix.
    pub fn with_object_name(mut self, name: impl Into<String>) -> Self {
        self.object_name = name.into();
        self
    }

    pub async fn publish(
        &self,
        artifact: &Artifact,
        date: NaiveDate,
    ) -> Result<StoredObject, PublishError> {
        let key = remote_key(date, &self.object_name);
        let stored = self.store.put(artifact.path(), &key).await?;
        info!(
            bucket = %stored.bucket,
            key = %stored.key,
            size_bytes = stored.size_bytes,
            "Artifact published"
        );
        Ok(stored)
    }
}

#[async_trait]
impl Stage for Publisher {
    type Input = Artifact;
    type Output = StoredObject;

    fn kind(&self) -> StageKind {
        StageKind::Publish
    }

    async fn run(&self, ctx: &RunContext, artifact: &Artifact) -> Result<StoredObject, StageError> {
        Ok(self.publish(artifact, ctx.run_date).await?)
    }
}
