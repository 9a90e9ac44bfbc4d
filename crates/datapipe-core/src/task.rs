//! Stage and run lifecycle records.

use crate::{CoreError, RunEvent, RunId, RunStatus, StageKind, StageStatus};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle record for one stage of one run.
///
/// Created when the orchestrator reaches the stage and mutated only by its
/// retry loop. Every mutation goes through [`TaskRun::transition`] so an
/// illegal move (say `Failed -> Running`) surfaces as an error instead of
/// silently corrupting the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    /// Which stage this record tracks.
    pub stage: StageKind,

    /// Number of times the stage operation has been invoked.
    pub attempts: u32,

    /// Current status.
    pub status: StageStatus,

    /// Message of the most recent failed attempt.
    pub last_error: Option<String>,

    /// When the first attempt started.
    pub started_at: Option<DateTime<Utc>>,

    /// When the stage reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRun {
    /// Create a pending record for `stage`.
    pub fn new(stage: StageKind) -> Self {
        Self {
            stage,
            attempts: 0,
            status: StageStatus::Pending,
            last_error: None,
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, to: StageStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(to) {
            return Err(CoreError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Begin an attempt. Valid from `Pending` and `Retrying`.
    pub fn start(&mut self) -> Result<(), CoreError> {
        self.transition(StageStatus::Running)?;
        self.attempts += 1;
        self.started_at.get_or_insert_with(Utc::now);
        Ok(())
    }

    /// Mark the current attempt as successful.
    pub fn succeed(&mut self) -> Result<(), CoreError> {
        self.transition(StageStatus::Succeeded)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Record a failed attempt that will be retried.
    pub fn retry(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        self.transition(StageStatus::Retrying)?;
        self.last_error = Some(error.into());
        Ok(())
    }

    /// Record the final failed attempt.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        self.transition(StageStatus::Failed)?;
        self.last_error = Some(error.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}

/// Record of one complete pipeline run, from trigger to terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique run identifier.
    pub run_id: RunId,

    /// Date the run publishes under.
    pub run_date: NaiveDate,

    /// Current run status.
    pub status: RunStatus,

    /// When the run was triggered.
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,

    /// Stage records, in the order the stages were entered.
    pub stages: Vec<TaskRun>,

    /// Every event emitted during the run, in emission order.
    pub events: Vec<RunEvent>,
}

impl PipelineRun {
    /// Start a fresh run for `run_date`.
    pub fn new(run_date: NaiveDate) -> Self {
        Self {
            run_id: RunId::generate(),
            run_date,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Append an event to the run log.
    pub fn record(&mut self, event: RunEvent) {
        self.events.push(event);
    }

    /// Mark the run as successful.
    pub fn succeed(&mut self) {
        self.status = RunStatus::Succeeded;
        self.finished_at = Some(Utc::now());
    }

    /// Mark the run as failed.
    pub fn fail(&mut self) {
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
    }

    /// Look up the record for a stage, if the run reached it.
    pub fn stage(&self, kind: StageKind) -> Option<&TaskRun> {
        self.stages.iter().find(|t| t.stage == kind)
    }

    /// The stage that ended the run, if it failed.
    pub fn failed_stage(&self) -> Option<&TaskRun> {
        self.stages
            .iter()
            .find(|t| t.status == StageStatus::Failed)
    }

    /// Check if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_cycle_counts_attempts() {
        let mut task = TaskRun::new(StageKind::Fetch);
        task.start().unwrap();
        task.retry("connection reset").unwrap();
        task.start().unwrap();
        task.succeed().unwrap();

        assert_eq!(task.attempts, 2);
        assert_eq!(task.status, StageStatus::Succeeded);
        assert_eq!(task.last_error.as_deref(), Some("connection reset"));
        assert!(task.finished_at.is_some());
    }

    #[test]
    fn test_terminal_task_rejects_restart() {
        let mut task = TaskRun::new(StageKind::Publish);
        task.start().unwrap();
        task.fail("denied").unwrap();

        let err = task.start().unwrap_err();
        assert!(matches!(err, CoreError::InvalidStateTransition { .. }));
        assert_eq!(task.attempts, 1);
    }

    #[test]
    fn test_cannot_succeed_before_start() {
        let mut task = TaskRun::new(StageKind::Transform);
        assert!(task.succeed().is_err());
        assert_eq!(task.status, StageStatus::Pending);
    }

    #[test]
    fn test_failed_stage_lookup() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let mut run = PipelineRun::new(date);

        let mut fetch = TaskRun::new(StageKind::Fetch);
        fetch.start().unwrap();
        fetch.succeed().unwrap();
        let mut transform = TaskRun::new(StageKind::Transform);
        transform.start().unwrap();
        transform.fail("timeout").unwrap();
        run.stages.push(fetch);
        run.stages.push(transform);
        run.fail();

        assert!(run.is_terminal());
        assert_eq!(run.failed_stage().map(|t| t.stage), Some(StageKind::Transform));
        assert!(run.stage(StageKind::Publish).is_none());
    }
}
