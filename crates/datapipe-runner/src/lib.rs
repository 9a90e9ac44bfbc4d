//! datapipe Runner Library
//!
//! Wires the fetch, transform, and publish stages into a strictly ordered
//! pipeline with per-stage retry, and provides the configuration and
//! trigger schedule the `datapipe` binary runs with.

pub mod config;
pub mod error;
pub mod json_output;
pub mod orchestrator;
pub mod retry;
pub mod schedule;
pub mod stages;

pub use config::Config;
pub use error::{ConfigError, FetchError, PipelineError, PublishError, StageError};
pub use orchestrator::{DefaultPipeline, Pipeline, RunReport};
pub use retry::RetryPolicy;
pub use schedule::WeeklySchedule;
pub use stages::{Fetcher, Publisher, RunContext, Stage, Transformer};
