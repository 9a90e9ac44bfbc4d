//! Transform job execution for datapipe
//!
//! The transform step is opaque: a command run in a working directory that,
//! on success, leaves exactly one artifact at a known relative path. This
//! crate spawns that command, forwards its output to the log, enforces a
//! hard timeout, and checks the artifact afterwards.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use std::time::Duration;
//! use datapipe_transform::JobExecutor;
//!
//! async fn transform() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = JobExecutor::new("jupyter")
//!         .with_args(["nbconvert", "--to", "notebook", "--execute", "code/etl_pipelines.ipynb"])
//!         .with_artifact("data_final/world_data.csv")
//!         .with_timeout(Duration::from_secs(600));
//!
//!     let result = executor
//!         .execute(&[PathBuf::from("data_source/api_gdp_data.csv")])
//!         .await?;
//!
//!     println!("Artifact: {}", result.artifact.path().display());
//!     Ok(())
//! }
//! ```

mod error;
mod executor;

pub use error::TransformError;
pub use executor::{JobExecutor, JobResult};
