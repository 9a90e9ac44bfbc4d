//! Fixed policy values shared by every run.

use crate::YearRange;
use std::time::Duration;

/// Attempts a stage gets before the run is aborted.
pub const MAX_ATTEMPTS: u32 = 3;

/// Pause between a failed attempt and the next one.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(60);

/// Hard limit on a single transform job invocation.
pub const TRANSFORM_TIMEOUT: Duration = Duration::from_secs(600);

/// Years kept in every indicator table, inclusive on both ends.
pub const YEAR_RANGE: YearRange = YearRange::new(2018, 2023);

/// Object name of the published artifact.
pub const ARTIFACT_NAME: &str = "world_data.csv";

/// `chrono` format of the date prefix in remote keys.
pub const REMOTE_DATE_FORMAT: &str = "%d-%m-%Y";
