//! Strictly ordered fetch, transform, publish chain with per-stage retry.

use chrono::{Local, NaiveDate};
use datapipe_core::{PipelineRun, RunEvent, TaskRun};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::retry::RetryPolicy;
use crate::stages::{Fetcher, Publisher, RunContext, Stage, Transformer};

/// The production chain.
pub type DefaultPipeline = Pipeline<Fetcher, Transformer, Publisher>;

/// Outcome of one run together with its lifecycle record.
#[derive(Debug)]
pub struct RunReport<O> {
    pub run: PipelineRun,
    pub outcome: Result<O, PipelineError>,
}

impl<O> RunReport<O> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn into_result(self) -> Result<O, PipelineError> {
        self.outcome
    }
}

/// Three stages wired output to input.
///
/// A stage starts only after its predecessor succeeded. Each stage is
/// attempted up to `policy.max_attempts` times with `policy.backoff`
/// between attempts; exhausting them ends the run and later stages are
/// never invoked.
pub struct Pipeline<F, T, P> {
    fetcher: F,
    transformer: T,
    publisher: P,
    policy: RetryPolicy,
    observer: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl<F, T, P> Pipeline<F, T, P>
where
    F: Stage<Input = ()>,
    T: Stage<Input = F::Output>,
    P: Stage<Input = T::Output>,
{
    pub fn new(fetcher: F, transformer: T, publisher: P) -> Self {
        Self {
            fetcher,
            transformer,
            publisher,
            policy: RetryPolicy::default(),
            observer: None,
        }
    }

    /// Builder method to replace the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builder method to receive a copy of every event as it is recorded.
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run once for today's local date.
    pub async fn run(&self) -> RunReport<P::Output> {
        self.run_on(Local::now().date_naive()).await
    }

    /// Run once, publishing under `run_date`.
    pub async fn run_on(&self, run_date: NaiveDate) -> RunReport<P::Output> {
        let mut run = PipelineRun::new(run_date);
        let ctx = RunContext {
            run_id: run.run_id.clone(),
            run_date,
        };

        info!(run_id = %ctx.run_id, run_date = %run_date, "Pipeline run started");
        self.emit(
            &mut run,
            RunEvent::run_started(ctx.run_id.clone(), &run_date.to_string()),
        );

        let outcome = self.execute(&mut run, &ctx).await;
        match &outcome {
            Ok(_) => {
                run.succeed();
                info!(run_id = %ctx.run_id, "Pipeline run succeeded");
                self.emit(&mut run, RunEvent::run_succeeded(ctx.run_id.clone()));
            }
            Err(e) => {
                run.fail();
                error!(run_id = %ctx.run_id, stage = %e.stage(), error = %e, "Pipeline run failed");
                self.emit(
                    &mut run,
                    RunEvent::run_failed(ctx.run_id.clone(), e.stage(), &e.to_string()),
                );
            }
        }

        RunReport { run, outcome }
    }

    async fn execute(
        &self,
        run: &mut PipelineRun,
        ctx: &RunContext,
    ) -> Result<P::Output, PipelineError> {
        let tables = self.run_stage(run, ctx, &self.fetcher, &()).await?;
        let artifact = self.run_stage(run, ctx, &self.transformer, &tables).await?;
        self.run_stage(run, ctx, &self.publisher, &artifact).await
    }

    /// Drive one stage through its retry loop.
    async fn run_stage<S: Stage>(
        &self,
        run: &mut PipelineRun,
        ctx: &RunContext,
        stage: &S,
        input: &S::Input,
    ) -> Result<S::Output, PipelineError> {
        let kind = stage.kind();
        run.stages.push(TaskRun::new(kind));
        let idx = run.stages.len() - 1;
        let lifecycle = |source| PipelineError::Lifecycle { stage: kind, source };

        loop {
            run.stages[idx].start().map_err(lifecycle)?;
            let attempt = run.stages[idx].attempts;
            info!(run_id = %ctx.run_id, stage = %kind, attempt, "Stage started");
            self.emit(run, RunEvent::stage_started(ctx.run_id.clone(), kind, attempt));

            let err = match stage.run(ctx, input).await {
                Ok(output) => {
                    run.stages[idx].succeed().map_err(lifecycle)?;
                    info!(run_id = %ctx.run_id, stage = %kind, attempt, "Stage succeeded");
                    self.emit(run, RunEvent::stage_succeeded(ctx.run_id.clone(), kind, attempt));
                    return Ok(output);
                }
                Err(err) => err,
            };

            let message = err.to_string();
            if !self.policy.should_retry(attempt) {
                run.stages[idx].fail(&message).map_err(lifecycle)?;
                error!(run_id = %ctx.run_id, stage = %kind, attempt, error = %message, "Stage failed, no attempts left");
                self.emit(
                    run,
                    RunEvent::stage_failed(ctx.run_id.clone(), kind, attempt, &message),
                );
                return Err(PipelineError::RetryExhausted {
                    stage: kind,
                    attempts: attempt,
                    source: err,
                });
            }

            run.stages[idx].retry(&message).map_err(lifecycle)?;
            warn!(
                run_id = %ctx.run_id,
                stage = %kind,
                attempt,
                backoff_secs = self.policy.backoff.as_secs(),
                error = %message,
                "Stage attempt failed, retrying"
            );
            self.emit(
                run,
                RunEvent::stage_retrying(
                    ctx.run_id.clone(),
                    kind,
                    attempt,
                    &message,
                    self.policy.backoff.as_secs(),
                ),
            );
            tokio::time::sleep(self.policy.backoff).await;
        }
    }

    fn emit(&self, run: &mut PipelineRun, event: RunEvent) {
        if let Some(observer) = &self.observer {
            // A dropped receiver only means nobody is watching.
            let _ = observer.send(event.clone());
        }
        run.record(event);
    }
}
