//! The three pipeline stages and the trait the orchestrator drives them through.

pub mod fetch;
pub mod publish;
pub mod transform;

use async_trait::async_trait;
use chrono::NaiveDate;
use datapipe_core::{RunId, StageKind};

use crate::error::StageError;

pub use fetch::Fetcher;
pub use publish::Publisher;
pub use transform::Transformer;

/// Values every stage of one run sees.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub run_date: NaiveDate,
}

/// One retryable unit of work.
///
/// `Input` is the output of the preceding stage, so a chain that compiles
/// is a chain whose data dependencies line up. `run` may be invoked several
/// times with the same input and must not rely on state from an earlier
/// failed attempt.
#[async_trait]
pub trait Stage: Send + Sync {
    type Input: Send + Sync;
    type Output: Send;

    fn kind(&self) -> StageKind;

    async fn run(&self, ctx: &RunContext, input: &Self::Input) -> Result<Self::Output, StageError>;
}
