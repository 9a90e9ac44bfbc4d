//! Runner configuration.
//!
//! Built from defaults, overlaid with an optional TOML file, then with
//! `DATAPIPE_*` environment variables.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use datapipe_api_client::http::{DEFAULT_BASE_URL, DEFAULT_PER_PAGE};
use datapipe_api_client::ApiClient;
use datapipe_core::policy::{ARTIFACT_NAME, TRANSFORM_TIMEOUT};
use datapipe_core::IndicatorSpec;
use datapipe_storage::{GcsStore, LocalStore, ObjectStore};
use datapipe_transform::JobExecutor;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::orchestrator::DefaultPipeline;
use crate::schedule::{parse_weekday, WeeklySchedule};
use crate::stages::fetch::DEFAULT_PAGE_CONCURRENCY;
use crate::stages::{Fetcher, Publisher, Transformer};

pub const ENV_API_BASE_URL: &str = "DATAPIPE_API_BASE_URL";
pub const ENV_STORAGE_BUCKET: &str = "DATAPIPE_STORAGE_BUCKET";
/// Bucket variable of older deployments, read when the one above is unset.
pub const ENV_STORAGE_BUCKET_LEGACY: &str = "FIREBASE_STORAGE";
pub const ENV_STORAGE_TOKEN: &str = "DATAPIPE_STORAGE_TOKEN";
pub const ENV_STORAGE_TOKEN_FILE: &str = "DATAPIPE_STORAGE_TOKEN_FILE";
pub const ENV_STORAGE_BACKEND: &str = "DATAPIPE_STORAGE_BACKEND";
pub const ENV_STORAGE_ROOT: &str = "DATAPIPE_STORAGE_ROOT";

/// Runner configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub api: ApiConfig,

    /// Indicators to fetch, in order.
    pub indicators: Vec<IndicatorSpec>,

    pub transform: TransformConfig,

    pub storage: StorageConfig,

    pub schedule: ScheduleConfig,
}

/// Indicator API settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub base_url: String,

    /// Rows per page.
    pub per_page: u32,

    /// Per-request timeout (seconds).
    pub request_timeout_secs: u64,

    /// Concurrent page requests per indicator.
    pub max_concurrent_pages: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            per_page: DEFAULT_PER_PAGE,
            request_timeout_secs: 30,
            max_concurrent_pages: DEFAULT_PAGE_CONCURRENCY,
        }
    }
}

/// Transform job settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformConfig {
    pub program: String,
    pub args: Vec<String>,

    /// Directory the job runs in.
    pub working_dir: PathBuf,

    /// Artifact location relative to `working_dir`.
    pub artifact: PathBuf,

    /// Hard limit on one invocation (seconds).
    pub timeout_secs: u64,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            program: "jupyter".to_string(),
            args: [
                "nbconvert",
                "--to",
                "notebook",
                "--execute",
                "code/etl_pipelines.ipynb",
                "--output",
                "notebook.ipynb",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            working_dir: PathBuf::from("."),
            artifact: Path::new("data_final").join(ARTIFACT_NAME),
            timeout_secs: TRANSFORM_TIMEOUT.as_secs(),
        }
    }
}

/// Where the artifact is published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Google Cloud Storage JSON API (Firebase Storage buckets included).
    #[default]
    Gcs,
    /// A directory on the local filesystem.
    Local,
}

impl std::str::FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gcs" => Ok(Self::Gcs),
            "local" => Ok(Self::Local),
            other => Err(ConfigError::Invalid(format!(
                "unknown storage backend '{other}' (expected gcs or local)"
            ))),
        }
    }
}

/// Storage settings.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub bucket: Option<String>,

    /// Bearer token for the GCS backend. Access tokens expire, so `serve`
    /// deployments should set `token_file` instead.
    pub token: Option<String>,

    /// File holding the GCS bearer token, re-read on every upload so an
    /// external refresher can rotate it. Wins over `token`.
    pub token_file: Option<PathBuf>,

    /// Alternative GCS endpoint.
    pub endpoint: Option<String>,

    /// Root directory for the local backend.
    pub root: PathBuf,

    /// Object name under the date prefix.
    pub object_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            bucket: None,
            token: None,
            token_file: None,
            endpoint: None,
            root: PathBuf::from("published"),
            object_name: ARTIFACT_NAME.to_string(),
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("backend", &self.backend)
            .field("bucket", &self.bucket)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("token_file", &self.token_file)
            .field("endpoint", &self.endpoint)
            .field("root", &self.root)
            .field("object_name", &self.object_name)
            .finish()
    }
}

/// Weekly trigger settings for `serve`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    pub weekday: String,
    pub hour: u32,
    pub minute: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            weekday: "monday".to_string(),
            hour: 9,
            minute: 0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            indicators: IndicatorSpec::defaults(),
            transform: TransformConfig::default(),
            storage: StorageConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path` (if any) and the process environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse a TOML document; absent keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Overlay environment variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup(ENV_API_BASE_URL) {
            self.api.base_url = url;
        }
        if let Some(bucket) = lookup(ENV_STORAGE_BUCKET).or_else(|| lookup(ENV_STORAGE_BUCKET_LEGACY)) {
            self.storage.bucket = Some(bucket);
        }
        if let Some(token) = lookup(ENV_STORAGE_TOKEN) {
            self.storage.token = Some(token);
        }
        if let Some(path) = lookup(ENV_STORAGE_TOKEN_FILE) {
            self.storage.token_file = Some(PathBuf::from(path));
        }
        if let Some(backend) = lookup(ENV_STORAGE_BACKEND) {
            self.storage.backend = backend.parse()?;
        }
        if let Some(root) = lookup(ENV_STORAGE_ROOT) {
            self.storage.root = PathBuf::from(root);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.indicators.is_empty() {
            return Err(ConfigError::Invalid("no indicators configured".to_string()));
        }

        let mut seen = HashSet::new();
        for spec in &self.indicators {
            if spec.code.trim().is_empty() {
                return Err(ConfigError::Invalid("indicator with empty code".to_string()));
            }
            if !seen.insert(&spec.output_path) {
                return Err(ConfigError::Invalid(format!(
                    "output path {} used by more than one indicator",
                    spec.output_path.display()
                )));
            }
        }

        if self.api.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("api.request_timeout_secs must be > 0".to_string()));
        }
        if self.api.per_page == 0 {
            return Err(ConfigError::Invalid("api.per_page must be > 0".to_string()));
        }
        if self.transform.timeout_secs == 0 {
            return Err(ConfigError::Invalid("transform.timeout_secs must be > 0".to_string()));
        }
        if self.transform.program.trim().is_empty() {
            return Err(ConfigError::Missing("transform.program"));
        }

        match self.storage.bucket.as_deref() {
            Some(bucket) if !bucket.trim().is_empty() => {}
            _ => return Err(ConfigError::Missing("storage.bucket")),
        }

        self.schedule()?;
        Ok(())
    }

    pub fn schedule(&self) -> Result<WeeklySchedule, ConfigError> {
        let weekday = parse_weekday(&self.schedule.weekday)?;
        WeeklySchedule::new(weekday, self.schedule.hour, self.schedule.minute)
    }

    /// Assemble the production pipeline.
    pub fn build_pipeline(&self) -> Result<DefaultPipeline, ConfigError> {
        let client = ApiClient::with_timeout(
            &self.api.base_url,
            Duration::from_secs(self.api.request_timeout_secs),
        )?
        .with_per_page(self.api.per_page);
        let fetcher = Fetcher::new(client, self.indicators.clone())
            .with_max_concurrent_pages(self.api.max_concurrent_pages);

        let executor = JobExecutor::new(self.transform.program.clone())
            .with_args(self.transform.args.iter().cloned())
            .with_working_dir(&self.transform.working_dir)
            .with_artifact(&self.transform.artifact)
            .with_timeout(Duration::from_secs(self.transform.timeout_secs));
        let transformer = Transformer::new(executor);

        let publisher =
            Publisher::new(self.build_store()?).with_object_name(self.storage.object_name.clone());

        Ok(DefaultPipeline::new(fetcher, transformer, publisher))
    }

    fn build_store(&self) -> Result<Arc<dyn ObjectStore>, ConfigError> {
        let bucket = self
            .storage
            .bucket
            .clone()
            .ok_or(ConfigError::Missing("storage.bucket"))?;

        Ok(match self.storage.backend {
            StorageBackend::Gcs => {
                let mut store = GcsStore::new(bucket, self.storage.token.clone());
                if let Some(endpoint) = &self.storage.endpoint {
                    store = store.with_endpoint(endpoint);
                }
                if let Some(path) = &self.storage.token_file {
                    store = store.with_token_file(path);
                }
                Arc::new(store)
            }
            StorageBackend::Local => Arc::new(LocalStore::new(&self.storage.root, bucket)),
        })
    }
}
