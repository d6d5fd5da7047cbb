//! Pipeline controller
//!
//! Drives one invocation from trigger to archived record:
//!
//! 1. evaluate the trigger and create a `Pending` run
//! 2. pass the concurrency gate and enter `Running`
//! 3. select the single eligible stage
//! 4. provision its agent, build its environment and run its steps under the
//!    overall deadline and the cancellation token
//! 5. reach a terminal status, notify on `Failed`/`TimedOut`
//! 6. archive the record and apply retention

use super::environment::{self, RuntimeFacts};
use super::errors::SelectionError;
use super::gate::ConcurrencyGate;
use super::history::{BuildHistory, RunRecord};
use super::log::LogBuffer;
use super::notifier::Notifier;
use super::provisioner::{ProvisionRequest, Provisioner, Scoped};
use super::run::{PipelineRun, RunReport};
use super::selector;
use super::steps::{StepExecutor, StepOutcome};
use super::traits::{ContainerRuntime, MailTransport, ShellRunner};
use super::trigger::{self, InvocationContext};
use crate::pipeline::{
    DEFAULT_LOG_LINES, Pipeline, PipelineError, RunStatus, TriggerFacts, Validate,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// External capabilities the controller runs with
#[derive(Clone)]
pub struct Services {
    /// Script interpreter boundary
    pub shell: Arc<dyn ShellRunner>,
    /// Container boundary, `None` restricts the pipeline to host agents
    pub runtime: Option<Arc<dyn ContainerRuntime>>,
    /// Mail boundary
    pub mail: Arc<dyn MailTransport>,
    /// Sender address of notifications
    pub from_address: Option<String>,
}

/// How the stage body ended
enum StageEnd {
    Finished(StepOutcome),
    TimedOut,
    Aborted,
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl<'a> RunningGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Terminal result of the Running phase
struct Outcome {
    status: RunStatus,
    stage: Option<String>,
    error: Option<String>,
}

impl Outcome {
    fn new(status: RunStatus, stage: Option<String>, error: Option<String>) -> Self {
        Self {
            status,
            stage,
            error,
        }
    }
}

/// Runs invocations of one pipeline definition
pub struct PipelineController {
    pipeline: Pipeline,
    workspace: PathBuf,
    gate: ConcurrencyGate,
    provisioner: Provisioner,
    executor: StepExecutor,
    notifier: Option<Notifier>,
    next_build: AtomicU64,
    running: AtomicUsize,
    history: Mutex<BuildHistory>,
}

impl std::fmt::Debug for PipelineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineController")
            .field("pipeline", &self.pipeline.name)
            .field("workspace", &self.workspace)
            .field("running", &self.running_count())
            .finish_non_exhaustive()
    }
}

impl PipelineController {
    /// Creates a controller for a validated pipeline
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Validation`] when the definition is invalid,
    /// including overlapping stage predicates.
    pub fn new(
        pipeline: Pipeline,
        workspace: impl Into<PathBuf>,
        services: Services,
    ) -> Result<Self, PipelineError> {
        pipeline.validate()?;

        let provisioner = match services.runtime {
            Some(runtime) => Provisioner::new(runtime),
            None => Provisioner::host_only(),
        };
        let notifier = pipeline.post.email().map(|email| {
            Notifier::new(email.clone(), services.mail).with_from(services.from_address)
        });

        Ok(Self {
            gate: ConcurrencyGate::new(pipeline.name.clone(), &pipeline.options),
            workspace: workspace.into(),
            provisioner,
            executor: StepExecutor::new(services.shell),
            notifier,
            next_build: AtomicU64::new(1),
            running: AtomicUsize::new(0),
            history: Mutex::new(BuildHistory::new()),
            pipeline,
        })
    }

    /// Pipeline definition
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Snapshot of the build history
    #[must_use]
    pub fn history(&self) -> BuildHistory {
        self.history.lock().clone()
    }

    /// Number of runs currently in `Running`
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Agent provisioner, for acquire/release accounting
    #[must_use]
    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    fn assign_build_number(&self, requested: Option<u64>) -> u64 {
        match requested {
            Some(number) => {
                self.next_build.fetch_max(number.saturating_add(1), Ordering::SeqCst);
                number
            }
            None => self.next_build.fetch_add(1, Ordering::SeqCst),
        }
    }

    /// Runs one invocation to a terminal status
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConcurrentRunRejected`] when concurrent builds
    /// are disabled with the `Reject` policy and another run is in progress;
    /// the rejected run is still archived as `Aborted`. Every other failure is
    /// reported through the status of the returned [`RunReport`].
    pub async fn run(
        &self,
        invocation: &InvocationContext,
        cancel: CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        let facts = trigger::evaluate(invocation);
        let build_number = self.assign_build_number(invocation.build_number);
        let mut run = PipelineRun::new(build_number, facts.clone());
        let log = LogBuffer::new();

        tracing::info!(
            pipeline = %self.pipeline.name,
            build = build_number,
            trigger = %facts,
            "Run created"
        );
        log.push(format!("Started: {}", invocation.cause_description()));

        let admitted = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            admission = self.gate.admit() => Some(admission),
        };
        let admission = match admitted {
            Some(Ok(admission)) => admission,
            Some(Err(err)) => {
                run.transition(RunStatus::Aborted)?;
                log.push(format!("ERROR: {err}"));
                tracing::warn!(build = build_number, error = %err, "Run rejected");
                self.finish(&run, None, &log);
                return Err(err);
            }
            None => {
                run.transition(RunStatus::Aborted)?;
                log.push("Aborted while waiting for a running build to finish");
                tracing::info!(build = build_number, "Run aborted while queued");
                return Ok(self.report(
                    &run,
                    Outcome::new(RunStatus::Aborted, None, Some("aborted while queued".to_string())),
                    &log,
                    started,
                    false,
                ));
            }
        };

        run.transition(RunStatus::Running)?;
        let deadline = self.pipeline.options.timeout_duration().and_then(|timeout| {
            let deadline = Instant::now().checked_add(timeout);
            if deadline.is_none() {
                tracing::warn!(
                    build = build_number,
                    timeout_secs = timeout.as_secs(),
                    "Timeout beyond clock range, running without deadline"
                );
            }
            deadline
        });

        let outcome = {
            let _running = RunningGuard::enter(&self.running);
            self.execute(&facts, build_number, deadline, &cancel, &log).await
        };
        run.transition(outcome.status)?;
        drop(admission);

        let elapsed = started.elapsed();
        if outcome.status.is_success() {
            tracing::info!(
                build = build_number,
                stage = ?outcome.stage,
                status = %outcome.status,
                duration_ms = elapsed.as_millis(),
                "Run finished"
            );
        } else {
            tracing::error!(
                build = build_number,
                stage = ?outcome.stage,
                status = %outcome.status,
                duration_ms = elapsed.as_millis(),
                error = ?outcome.error,
                "Run finished"
            );
        }

        let mut notified = false;
        if let Some(ref notifier) = self.notifier
            && let Some(event) = notifier.event(invocation, &facts, build_number, outcome.status, &log)
        {
            notifier.notify(&event).await;
            notified = true;
        }

        Ok(self.report(&run, outcome, &log, started, notified))
    }

    async fn execute(
        &self,
        facts: &TriggerFacts,
        build_number: u64,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
        log: &LogBuffer,
    ) -> Outcome {
        let stage = match selector::select(&self.pipeline.stages, facts) {
            Ok(stage) => stage,
            Err(SelectionError::NoStage { .. }) => {
                log.push(format!("No stage is eligible for {facts}, nothing to do"));
                tracing::info!(build = build_number, trigger = %facts, "No eligible stage");
                return Outcome::new(RunStatus::Succeeded, None, None);
            }
            Err(err) => {
                log.push(format!("ERROR: {err}"));
                return Outcome::new(RunStatus::Failed, None, Some(err.to_string()));
            }
        };

        let stage_name = Some(stage.name.clone());
        log.push(format!("[Pipeline] stage ({}) on {}", stage.name, stage.agent));
        tracing::info!(build = build_number, stage = %stage.name, agent = %stage.agent, "Stage selected");

        let request = ProvisionRequest {
            workspace: self.workspace.clone(),
            project: self.pipeline.name.clone(),
            build_number,
            stage: stage.name.clone(),
        };
        let globals = &self.pipeline.environment;
        let executor = &self.executor;
        let interrupt = async {
            tokio::select! {
                biased;
                () = cancel.cancelled() => StageEnd::Aborted,
                () = deadline_elapsed(deadline) => StageEnd::TimedOut,
            }
        };

        let ended = self
            .provisioner
            .scoped(&stage.agent, &request, interrupt, move |agent| async move {
                let runtime_facts = RuntimeFacts {
                    temp_dir: agent.temp_dir().to_path_buf(),
                    workspace: agent.workspace().to_path_buf(),
                    build_number,
                    branch: facts.branch.clone(),
                    stage_name: stage.name.clone(),
                };
                let env = environment::build(
                    globals.iter().chain(stage.environment.iter()),
                    &runtime_facts,
                );

                StageEnd::Finished(executor.run(&stage.steps, &agent, &env, log).await)
            })
            .await
            .map(|scoped| match scoped {
                Scoped::Completed(end) | Scoped::Interrupted(end) => end,
            });

        match ended {
            Err(err) => {
                log.push(format!("ERROR: {err}"));
                Outcome::new(RunStatus::Failed, stage_name, Some(err.to_string()))
            }
            Ok(StageEnd::Finished(outcome @ StepOutcome::Succeeded { .. })) => {
                tracing::debug!(build = build_number, outcome = %outcome, "Stage completed");
                Outcome::new(RunStatus::Succeeded, stage_name, None)
            }
            Ok(StageEnd::Finished(outcome)) => {
                log.push(format!("ERROR: {outcome}"));
                Outcome::new(RunStatus::Failed, stage_name, Some(outcome.to_string()))
            }
            Ok(StageEnd::TimedOut) => {
                log.push("Timeout has been exceeded");
                Outcome::new(
                    RunStatus::TimedOut,
                    stage_name,
                    Some("overall timeout exceeded".to_string()),
                )
            }
            Ok(StageEnd::Aborted) => {
                log.push("Aborted by cancellation");
                Outcome::new(RunStatus::Aborted, stage_name, Some("run was cancelled".to_string()))
            }
        }
    }

    fn report(
        &self,
        run: &PipelineRun,
        outcome: Outcome,
        log: &LogBuffer,
        started: Instant,
        notified: bool,
    ) -> RunReport {
        self.finish(run, outcome.stage.clone(), log);
        RunReport {
            build_number: run.build_number,
            status: outcome.status,
            stage: outcome.stage,
            log_tail: log.tail(DEFAULT_LOG_LINES),
            duration: started.elapsed(),
            error: outcome.error,
            notified,
        }
    }

    /// Archives a terminal run and applies retention
    fn finish(&self, run: &PipelineRun, stage: Option<String>, log: &LogBuffer) {
        let now = Utc::now();
        let record = RunRecord {
            build_number: run.build_number,
            status: run.status(),
            stage,
            trigger: run.trigger.clone(),
            started_at: run.started_at,
            finished_at: now,
            log_tail: log.tail(DEFAULT_LOG_LINES),
        };

        let pruned = self.history.lock().archive(
            record,
            self.pipeline.options.build_discarder.as_ref(),
            now,
        );
        for old in pruned {
            tracing::debug!(build = old.build_number, "Build discarded by retention");
        }
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::errors::MailError;
    use crate::executor::traits::{MailMessage, ShellInvocation, ShellResult};
    use crate::executor::trigger::Cause;
    use crate::executor::ShellError;
    use crate::pipeline::{
        PipelineOptions, Stage, Step, TimeUnit, Timeout, TriggerCause, WhenCondition,
    };
    use async_trait::async_trait;
    use std::time::Duration;

    struct ExitShell;

    #[async_trait]
    impl ShellRunner for ExitShell {
        async fn run(
            &self,
            invocation: &ShellInvocation,
            log: &LogBuffer,
        ) -> Result<ShellResult, ShellError> {
            let body = invocation.script.lines().last().unwrap_or("");
            log.push(body.to_string());
            Ok(ShellResult {
                exit_code: i32::from(body == "false"),
                duration: Duration::ZERO,
            })
        }
    }

    struct NoMail;

    #[async_trait]
    impl MailTransport for NoMail {
        async fn send(&self, _message: &MailMessage) -> Result<(), MailError> {
            Ok(())
        }
    }

    fn controller(pipeline: Pipeline) -> PipelineController {
        let services = Services {
            shell: Arc::new(ExitShell),
            runtime: None,
            mail: Arc::new(NoMail),
            from_address: None,
        };
        PipelineController::new(pipeline, std::env::temp_dir(), services).unwrap()
    }

    fn pipeline(script: &str) -> Pipeline {
        Pipeline::builder("demo")
            .stage(
                Stage::new("only", vec![Step::shell(script)])
                    .with_when(WhenCondition::triggered_by(TriggerCause::Manual)),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_numbers_are_monotonic() {
        let ctl = controller(pipeline("true"));
        assert_eq!(ctl.assign_build_number(None), 1);
        assert_eq!(ctl.assign_build_number(Some(10)), 10);
        assert_eq!(ctl.assign_build_number(None), 11);
        assert_eq!(ctl.assign_build_number(Some(3)), 3);
        assert_eq!(ctl.assign_build_number(None), 12);
    }

    #[tokio::test]
    async fn test_run_succeeds_and_is_archived() {
        let ctl = controller(pipeline("true"));
        let report = ctl
            .run(&InvocationContext::new("demo"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.stage.as_deref(), Some("only"));
        assert!(!report.notified);
        assert_eq!(ctl.history().build_numbers(), vec![1]);
        assert_eq!(ctl.running_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_beyond_clock_range_runs_without_deadline() {
        let mut definition = pipeline("true");
        definition.options =
            PipelineOptions::new().with_timeout(Timeout::new(u64::MAX / 2, TimeUnit::Seconds));
        let ctl = controller(definition);

        let report = ctl
            .run(&InvocationContext::new("demo"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_no_stage_is_successful_no_op() {
        let ctl = controller(pipeline("true"));
        let invocation = InvocationContext::new("demo").with_cause(Cause::Timer);
        let report = ctl.run(&invocation, CancellationToken::new()).await.unwrap();

        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.stage, None);
        assert_eq!(ctl.provisioner().acquired_count(), 0);
    }

    #[tokio::test]
    async fn test_step_failure_fails_run() {
        let ctl = controller(pipeline("false"));
        let report = ctl
            .run(&InvocationContext::new("demo"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.error.unwrap().contains("exit code 1"));
        assert_eq!(ctl.provisioner().released_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_admission_is_aborted() {
        let ctl = controller(pipeline("true"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = ctl.run(&InvocationContext::new("demo"), cancel).await.unwrap();
        assert_eq!(report.status, RunStatus::Aborted);
        assert_eq!(ctl.provisioner().acquired_count(), 0);
        assert_eq!(
            ctl.history().latest().map(|r| r.status),
            Some(RunStatus::Aborted)
        );
    }
}
