//! datapipe Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Filesystem or subprocesses
//! - Runtime specifics
//!
//! All types here describe a pipeline run: its stages, their lifecycle
//! records, the events a run emits, and the indicator tables it produces.

pub mod artifact;
pub mod error;
pub mod event;
pub mod ids;
pub mod indicator;
pub mod policy;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use artifact::Artifact;
pub use error::CoreError;
pub use event::{RunEvent, RunEventType};
pub use ids::{EventId, RunId};
pub use indicator::{EntityKey, IndicatorSpec, IndicatorTable, RawRecord, YearRange};
pub use status::{RunStatus, StageKind, StageStatus};
pub use task::{PipelineRun, TaskRun};
