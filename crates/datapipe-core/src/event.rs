//! Run events for tracking stage transitions.

use crate::ids::{EventId, RunId};
use crate::StageKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single observable step in a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Unique event identifier.
    pub id: EventId,
    /// Run this event belongs to.
    pub run_id: RunId,
    /// Stage the event concerns; `None` for run-level events.
    pub stage: Option<StageKind>,
    /// Type of event.
    pub event_type: RunEventType,
    /// Attempt number for stage events.
    pub attempt: Option<u32>,
    /// Unix timestamp (milliseconds) when event occurred.
    pub timestamp_ms: i64,
    /// Event-specific metadata (error, backoff_secs, ...).
    pub metadata: HashMap<String, String>,
}

impl RunEvent {
    /// Create a new run event.
    pub fn new(
        run_id: RunId,
        stage: Option<StageKind>,
        event_type: RunEventType,
        attempt: Option<u32>,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            id: EventId::generate(),
            run_id,
            stage,
            event_type,
            attempt,
            timestamp_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as i64,
            metadata,
        }
    }

    /// Create a RunStarted event.
    pub fn run_started(run_id: RunId, run_date: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("run_date".to_string(), run_date.to_string());
        Self::new(run_id, None, RunEventType::RunStarted, None, metadata)
    }

    /// Create a StageStarted event.
    pub fn stage_started(run_id: RunId, stage: StageKind, attempt: u32) -> Self {
        Self::new(
            run_id,
            Some(stage),
            RunEventType::StageStarted,
            Some(attempt),
            HashMap::new(),
        )
    }

    /// Create a StageRetrying event.
    pub fn stage_retrying(
        run_id: RunId,
        stage: StageKind,
        attempt: u32,
        error: &str,
        backoff_secs: u64,
    ) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("error".to_string(), error.to_string());
        metadata.insert("backoff_secs".to_string(), backoff_secs.to_string());
        Self::new(
            run_id,
            Some(stage),
            RunEventType::StageRetrying,
            Some(attempt),
            metadata,
        )
    }

    /// Create a StageSucceeded event.
    pub fn stage_succeeded(run_id: RunId, stage: StageKind, attempt: u32) -> Self {
        Self::new(
            run_id,
            Some(stage),
            RunEventType::StageSucceeded,
            Some(attempt),
            HashMap::new(),
        )
    }

    /// Create a StageFailed event.
    pub fn stage_failed(run_id: RunId, stage: StageKind, attempt: u32, error: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("error".to_string(), error.to_string());
        Self::new(
            run_id,
            Some(stage),
            RunEventType::StageFailed,
            Some(attempt),
            metadata,
        )
    }

    /// Create a RunSucceeded event.
    pub fn run_succeeded(run_id: RunId) -> Self {
        Self::new(run_id, None, RunEventType::RunSucceeded, None, HashMap::new())
    }

    /// Create a RunFailed event naming the stage that ended the run.
    pub fn run_failed(run_id: RunId, stage: StageKind, error: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("error".to_string(), error.to_string());
        Self::new(run_id, Some(stage), RunEventType::RunFailed, None, metadata)
    }
}

/// Type of run event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunEventType {
    /// Run triggered.
    RunStarted,
    /// A stage attempt began.
    StageStarted,
    /// A stage attempt failed and will be retried after the backoff.
    StageRetrying,
    /// A stage reached `Succeeded`.
    StageSucceeded,
    /// A stage exhausted its attempts.
    StageFailed,
    /// Every stage succeeded.
    RunSucceeded,
    /// The run was aborted by a failed stage.
    RunFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_started() {
        let run_id = RunId::generate();
        let event = RunEvent::stage_started(run_id.clone(), StageKind::Fetch, 1);

        assert_eq!(event.run_id, run_id);
        assert_eq!(event.stage, Some(StageKind::Fetch));
        assert_eq!(event.event_type, RunEventType::StageStarted);
        assert_eq!(event.attempt, Some(1));
        assert!(event.timestamp_ms > 0);
    }

    #[test]
    fn test_stage_retrying_metadata() {
        let event = RunEvent::stage_retrying(
            RunId::generate(),
            StageKind::Transform,
            2,
            "job exited with code 1",
            60,
        );

        assert_eq!(event.event_type, RunEventType::StageRetrying);
        assert_eq!(event.metadata.get("backoff_secs"), Some(&"60".to_string()));
        assert_eq!(
            event.metadata.get("error"),
            Some(&"job exited with code 1".to_string())
        );
    }

    #[test]
    fn test_event_type_serializes_snake_case() {
        let json = serde_json::to_string(&RunEventType::StageSucceeded).unwrap();
        assert_eq!(json, "\"stage_succeeded\"");
    }
}
