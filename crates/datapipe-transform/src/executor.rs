//! Subprocess executor for the transform job.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use datapipe_core::policy::{ARTIFACT_NAME, TRANSFORM_TIMEOUT};
use datapipe_core::Artifact;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::TransformError;

/// Environment variable through which the job receives its input paths,
/// joined with the platform path separator.
pub const INPUTS_ENV: &str = "DATAPIPE_INPUTS";

/// Lines of stderr kept as the failure diagnostic.
const STDERR_TAIL_LINES: usize = 20;

/// Result of a successful job run.
#[derive(Debug, Clone)]
pub struct JobResult {
    /// The artifact the job left behind.
    pub artifact: Artifact,

    /// Exit code of the job process.
    pub exit_code: i32,

    /// Wall time from spawn to exit.
    pub duration: Duration,
}

/// Runs the transform job command.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use datapipe_transform::JobExecutor;
///
/// async fn run() -> Result<(), Box<dyn std::error::Error>> {
///     let executor = JobExecutor::new("python3")
///         .with_args(["consolidate.py"])
///         .with_working_dir("jobs")
///         .with_artifact("out/world_data.csv")
///         .with_timeout(Duration::from_secs(120));
///
///     let result = executor.execute(&[]).await?;
///     println!("took {:?}", result.duration);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct JobExecutor {
    /// Program to run, resolved through PATH when not absolute.
    program: String,

    /// Arguments passed to the program.
    args: Vec<String>,

    /// Directory the job runs in.
    working_dir: PathBuf,

    /// Artifact location relative to `working_dir`.
    artifact: PathBuf,

    /// Hard limit on one invocation.
    timeout: Duration,

    /// Additional environment variables.
    env_vars: Vec<(String, String)>,
}

impl JobExecutor {
    /// Create an executor for `program` with the default artifact location
    /// and timeout.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: PathBuf::from("."),
            artifact: Path::new("data_final").join(ARTIFACT_NAME),
            timeout: TRANSFORM_TIMEOUT,
            env_vars: Vec::new(),
        }
    }

    /// Set the program arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Set the artifact path, relative to the working directory.
    pub fn with_artifact(mut self, artifact: impl Into<PathBuf>) -> Self {
        self.artifact = artifact.into();
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Where the artifact is expected after a successful run.
    pub fn artifact_path(&self) -> PathBuf {
        self.working_dir.join(&self.artifact)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the job once and wait for it.
    ///
    /// Every path in `inputs` must exist before the job is spawned. Any
    /// artifact left by an earlier run is removed first, so only this
    /// invocation can satisfy the artifact check. On timeout the child is
    /// killed.
    pub async fn execute(&self, inputs: &[PathBuf]) -> Result<JobResult, TransformError> {
        for input in inputs {
            if !tokio::fs::try_exists(input).await? {
                return Err(TransformError::MissingInput(input.clone()));
            }
        }

        let artifact_path = self.artifact_path();
        match tokio::fs::remove_file(&artifact_path).await {
            Ok(()) => debug!(path = %artifact_path.display(), "Removed stale artifact"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(
            program = %self.program,
            working_dir = %self.working_dir.display(),
            inputs = inputs.len(),
            timeout_secs = self.timeout.as_secs(),
            "Starting transform job"
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout reaches everything the job forked.
        #[cfg(unix)]
        cmd.process_group(0);

        if let Ok(joined) = std::env::join_paths(inputs) {
            cmd.env(INPUTS_ENV, joined);
        }
        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| TransformError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(stdout = %line.trim_end(), "Transform job output");
                }
            });
        }

        let pid = child.id();
        let tail = Arc::new(Mutex::new(VecDeque::<String>::with_capacity(
            STDERR_TAIL_LINES,
        )));
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = Arc::clone(&tail);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = line.trim_end();
                    if line.is_empty() {
                        continue;
                    }
                    warn!(stderr = %line, "Transform job stderr");
                    push_tail(&tail, line);
                }
            })
        });

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Transform job timed out, killing");
                kill_process_group(pid);
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill transform job");
                }
                if let Some(handle) = stderr_task {
                    handle.abort();
                }
                return Err(TransformError::Timeout(self.timeout));
            }
        };
        // Nothing the job left running in the background outlives it.
        kill_process_group(pid);
        let status = status?;

        let exit_code = status.code().unwrap_or(-1);
        let duration = started.elapsed();
        info!(
            exit_code,
            success = status.success(),
            duration_ms = duration.as_millis() as u64,
            "Transform job exited"
        );

        if !status.success() {
            if let Some(mut handle) = stderr_task {
                // A descendant outside the group can still hold stderr open.
                let remaining = self.timeout.saturating_sub(started.elapsed());
                if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                    warn!("Stderr still open after job exit, keeping the tail read so far");
                    handle.abort();
                }
            }
            let stderr_tail = tail
                .lock()
                .map(|tail| tail.iter().cloned().collect::<Vec<_>>().join("\n"))
                .unwrap_or_default();
            return Err(TransformError::JobFailed {
                exit_code,
                stderr_tail,
            });
        }

        if !tokio::fs::try_exists(&artifact_path).await? {
            return Err(TransformError::ArtifactMissing(artifact_path));
        }

        Ok(JobResult {
            artifact: Artifact::from_path(artifact_path),
            exit_code,
            duration,
        })
    }
}

fn push_tail(tail: &Mutex<VecDeque<String>>, line: &str) {
    if let Ok(mut tail) = tail.lock() {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line.to_string());
    }
}

/// SIGKILL every process in the job's group. The group id is the leader's
/// pid since the job is spawned with `process_group(0)`.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; it touches no memory of ours.
    let rc = unsafe { libc::killpg(pid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pgid = pid, error = %err, "Failed to kill transform job process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(dir: &Path, script: &str) -> JobExecutor {
        JobExecutor::new("sh")
            .with_args(["-c", script])
            .with_working_dir(dir)
            .with_artifact("out/result.csv")
            .with_timeout(Duration::from_secs(10))
    }

    #[test]
    fn test_executor_builder() {
        let executor = JobExecutor::new("jupyter")
            .with_args(["nbconvert", "--execute"])
            .with_working_dir("/srv/pipeline")
            .with_env("PYTHONUNBUFFERED", "1");

        assert_eq!(executor.program, "jupyter");
        assert_eq!(executor.args.len(), 2);
        assert_eq!(executor.timeout(), TRANSFORM_TIMEOUT);
        assert_eq!(
            executor.artifact_path(),
            PathBuf::from("/srv/pipeline/data_final/world_data.csv")
        );
        assert_eq!(executor.env_vars.len(), 1);
    }

    #[tokio::test]
    async fn test_successful_job_returns_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.csv");
        std::fs::write(&input, "a\n1\n").unwrap();

        let executor = sh(
            dir.path(),
            "mkdir -p out && printf '%s' \"$DATAPIPE_INPUTS\" > out/result.csv",
        );
        let result = executor.execute(&[input.clone()]).await.unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.artifact.name, "result.csv");
        let written = std::fs::read_to_string(&result.artifact.path).unwrap();
        assert_eq!(written, input.to_string_lossy());
    }

    #[tokio::test]
    async fn test_stale_artifact_does_not_count() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("out")).unwrap();
        std::fs::write(dir.path().join("out/result.csv"), "old").unwrap();

        let err = sh(dir.path(), "true").execute(&[]).await.unwrap_err();
        assert!(matches!(err, TransformError::ArtifactMissing(_)));
    }

    #[tokio::test]
    async fn test_failed_job_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let err = sh(dir.path(), "echo 'cell 4 raised KeyError' >&2; exit 3")
            .execute(&[])
            .await
            .unwrap_err();

        match err {
            TransformError::JobFailed {
                exit_code,
                stderr_tail,
            } => {
                assert_eq!(exit_code, 3);
                assert!(stderr_tail.contains("KeyError"));
            }
            other => panic!("Expected JobFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_job() {
        let dir = tempfile::tempdir().unwrap();
        let executor = sh(dir.path(), "sleep 5").with_timeout(Duration::from_millis(200));

        let started = Instant::now();
        let err = executor.execute(&[]).await.unwrap_err();

        assert!(matches!(err, TransformError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_failed_job_with_background_child_returns_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let executor = sh(dir.path(), "sleep 20 & echo boom >&2; exit 1")
            .with_timeout(Duration::from_secs(2));

        let started = Instant::now();
        let err = tokio::time::timeout(Duration::from_secs(8), executor.execute(&[]))
            .await
            .expect("execute hung on inherited stderr")
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            TransformError::JobFailed {
                exit_code,
                stderr_tail,
            } => {
                assert_eq!(exit_code, 1);
                assert!(stderr_tail.contains("boom"));
            }
            other => panic!("Expected JobFailed, got {other:?}"),
        }
    }

    #[cfg(target_os = "linux")]
    fn is_running(pid: u32) -> bool {
        // Killed orphans may linger as zombies until reaped.
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_forked_children() {
        let dir = tempfile::tempdir().unwrap();
        let executor = sh(dir.path(), "sleep 47 & echo $! > bg.pid; wait")
            .with_timeout(Duration::from_secs(1));

        let err = executor.execute(&[]).await.unwrap_err();
        assert!(matches!(err, TransformError::Timeout(_)));

        let pid: u32 = std::fs::read_to_string(dir.path().join("bg.pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(3);
        while is_running(pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!is_running(pid), "background sleep {pid} survived the timeout");
    }

    #[tokio::test]
    async fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.csv");
        let err = sh(dir.path(), "true").execute(&[missing]).await.unwrap_err();
        assert!(matches!(err, TransformError::MissingInput(_)));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = JobExecutor::new("/nonexistent/transform-job")
            .with_working_dir(dir.path())
            .execute(&[])
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::Spawn { .. }));
    }
}
