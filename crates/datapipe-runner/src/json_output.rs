//! JSON output for streaming run events to stdout.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use datapipe_core::{PipelineRun, RunEvent};
use serde::Serialize;

use crate::error::PipelineError;

/// Global flag to enable JSON output mode.
static JSON_MODE_ENABLED: AtomicBool = AtomicBool::new(false);

/// Enable JSON output mode.
pub fn enable_json_mode() {
    JSON_MODE_ENABLED.store(true, Ordering::SeqCst);
}

/// Check if JSON mode is enabled.
pub fn is_json_mode() -> bool {
    JSON_MODE_ENABLED.load(Ordering::SeqCst)
}

/// JSON event types that can be emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonEventType {
    RunEvent,
    RunReport,
    NextTrigger,
    Error,
}

/// A JSON event to be output to stdout.
#[derive(Debug, Clone, Serialize)]
pub struct JsonEvent {
    pub event: JsonEventType,
    pub timestamp: String,
    pub data: serde_json::Value,
}

impl JsonEvent {
    /// Create a new JSON event with the current timestamp.
    pub fn new(event: JsonEventType, data: serde_json::Value) -> Self {
        Self {
            event,
            timestamp: chrono::Utc::now().to_rfc3339(),
            data,
        }
    }

    /// Output this event as a JSON line to stdout.
    pub fn emit(&self) {
        if !is_json_mode() {
            return;
        }
        if let Ok(json) = serde_json::to_string(self) {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{}", json);
            let _ = stdout.flush();
        }
    }
}

/// Emit a run_event line.
pub fn emit_run_event(event: &RunEvent) {
    JsonEvent::new(
        JsonEventType::RunEvent,
        serde_json::to_value(event).unwrap_or_default(),
    )
    .emit();
}

/// Build the payload of a run_report line.
pub fn report_payload<O: Serialize>(
    run: &PipelineRun,
    outcome: &Result<O, PipelineError>,
) -> serde_json::Value {
    let stages: Vec<_> = run
        .stages
        .iter()
        .map(|task| {
            serde_json::json!({
                "stage": task.stage,
                "status": task.status,
                "attempts": task.attempts,
                "last_error": task.last_error,
            })
        })
        .collect();

    let mut payload = serde_json::json!({
        "run_id": run.run_id.as_str(),
        "run_date": run.run_date.to_string(),
        "status": run.status,
        "stages": stages,
    });
    match outcome {
        Ok(output) => {
            payload["output"] = serde_json::to_value(output).unwrap_or_default();
        }
        Err(e) => {
            payload["failed_stage"] = serde_json::json!(e.stage());
            payload["error"] = serde_json::json!(e.to_string());
        }
    }
    payload
}

/// Emit a run_report line.
pub fn emit_report<O: Serialize>(run: &PipelineRun, outcome: &Result<O, PipelineError>) {
    JsonEvent::new(JsonEventType::RunReport, report_payload(run, outcome)).emit();
}

/// Emit a next_trigger line.
pub fn emit_next_trigger(at: &str) {
    JsonEvent::new(
        JsonEventType::NextTrigger,
        serde_json::json!({
            "at": at,
        }),
    )
    .emit();
}

/// Emit an error line.
pub fn emit_error(message: &str) {
    JsonEvent::new(
        JsonEventType::Error,
        serde_json::json!({
            "message": message,
        }),
    )
    .emit();
}
