//! End-to-end runs of the controller against fake boundaries

mod common;

use common::{CountingRuntime, DEMO_INVOCATION, Harness, demo_pipeline};
use pretty_assertions::assert_eq;
use runline::executor::{Cause, Change, InvocationContext};
use runline::pipeline::{
    AgentSpec, BuildDiscarder, ConcurrencyPolicy, EmailNotification, Environment, Pipeline,
    PipelineError, PipelineOptions, RecipientProvider, RunStatus, Stage, Step, TriggerCause,
    WhenCondition,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn manual_pipeline(steps: &[&str], options: PipelineOptions) -> Pipeline {
    Pipeline::builder("demo")
        .options(options)
        .stage(
            Stage::new("build", steps.iter().map(|s| Step::shell(*s)).collect())
                .with_when(WhenCondition::triggered_by(TriggerCause::Manual)),
        )
        .on_failure_email(
            EmailNotification::new()
                .recipient(RecipientProvider::Static(vec!["dev@example.org".to_string()]))
                .subject("$PROJECT_NAME #$BUILD_NUMBER $BUILD_STATUS"),
        )
        .build()
        .unwrap()
}

fn manual() -> InvocationContext {
    InvocationContext::new("demo")
}

#[tokio::test]
async fn test_weekly_timer_on_main_runs_weekly_stage() {
    let h = Harness::new(demo_pipeline());
    let invocation = InvocationContext::new("plenoptic")
        .with_cause(Cause::Timer)
        .with_branch("main");

    let report = h.controller.run(&invocation, CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.stage.as_deref(), Some("weekly"));
    assert!(!report.notified);

    assert_eq!(h.runtime.builds().len(), 1);
    let started = h.runtime.started();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].args, vec!["--gpus", "all"]);
    assert_eq!(h.runtime.removed(), vec!["c1"]);
    assert_eq!((h.acquired(), h.released()), (1, 1));

    assert_eq!(
        h.shell.executed(),
        vec![
            "pip install --user -e .",
            "python -m pytest -n auto --durations=10 tests/"
        ]
    );
    let env = &h.shell.envs()[0];
    assert_eq!(env["OMP_NUM_THREADS"], "4");
    assert_eq!(env["HOME"], env["WORKSPACE_TMP"]);
    assert!(env["HOME"].contains("runline-1-weekly-"));
    assert!(h.outbox.sent().is_empty());
}

#[tokio::test]
async fn test_branch_event_runs_commit_stage() {
    let h = Harness::new(demo_pipeline());
    let invocation = InvocationContext::new("plenoptic")
        .with_cause(Cause::Scm)
        .with_branch("feature-x");

    let report = h.controller.run(&invocation, CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.stage.as_deref(), Some("commit"));
    assert_eq!(h.runtime.started()[0].args, vec!["--gpus", "1"]);
    assert_eq!(h.shell.envs()[1]["PYTEST_ADDOPTS"], "-m 'not slow'");
    assert_eq!(h.shell.envs()[1]["BRANCH_NAME"], "feature-x");
}

#[tokio::test]
async fn test_timer_on_other_branch_is_a_no_op() {
    let h = Harness::new(demo_pipeline());
    let invocation = InvocationContext::new("plenoptic")
        .with_cause(Cause::Timer)
        .with_branch("feature-x");

    let report = h.controller.run(&invocation, CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.stage, None);
    assert_eq!(h.acquired(), 0);
    assert!(h.shell.executed().is_empty());
    assert!(h.runtime.builds().is_empty());
}

#[tokio::test]
async fn test_recorded_invocation_selects_weekly() {
    let source = std::fs::read_to_string(DEMO_INVOCATION).unwrap();
    let invocation = InvocationContext::from_json(&source).unwrap();
    let h = Harness::new(demo_pipeline());

    let report = h.controller.run(&invocation, CancellationToken::new()).await.unwrap();

    assert_eq!(report.build_number, 42);
    assert_eq!(report.stage.as_deref(), Some("weekly"));
    assert_eq!(h.shell.envs()[0]["BUILD_NUMBER"], "42");
}

#[tokio::test]
async fn test_failing_step_stops_stage_and_notifies_once() {
    let h = Harness::new(manual_pipeline(
        &["echo a", "exit 2", "echo c"],
        PipelineOptions::new(),
    ));

    let report = h.controller.run(&manual(), CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.notified);
    assert_eq!(h.shell.executed(), vec!["echo a", "exit 2"]);
    assert!(report.error.unwrap().contains("script returned exit code 2"));
    assert_eq!((h.acquired(), h.released()), (1, 1));

    let sent = h.outbox.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["dev@example.org"]);
    assert_eq!(sent[0].from.as_deref(), Some("ci@example.org"));
    assert_eq!(sent[0].subject, "demo #1 FAILURE");
}

#[tokio::test]
async fn test_timeout_mid_step_times_out_and_releases() {
    let options = PipelineOptions::new().with_timeout(Duration::from_secs(1));
    let h = Harness::new(manual_pipeline(&["sleep-ms 30000", "echo never"], options));

    let report = h.controller.run(&manual(), CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::TimedOut);
    assert!(report.duration < Duration::from_secs(10));
    assert!(report.log_tail.iter().any(|l| l == "Timeout has been exceeded"));
    assert_eq!(h.shell.executed(), vec!["sleep-ms 30000"]);
    assert_eq!((h.acquired(), h.released()), (1, 1));

    let sent = h.outbox.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "demo #1 TIMEOUT");
}

#[tokio::test]
async fn test_cancel_mid_step_aborts_and_removes_container() {
    let pipeline = Pipeline::builder("demo")
        .stage(
            Stage::new("build", vec![Step::shell("sleep-ms 30000")])
                .with_agent(AgentSpec::docker("python:3.11")),
        )
        .on_failure_email(
            EmailNotification::new()
                .recipient(RecipientProvider::Static(vec!["dev@example.org".to_string()])),
        )
        .build()
        .unwrap();
    let h = Harness::new(pipeline);
    let cancel = CancellationToken::new();
    let invocation = manual();

    let (report, ()) = tokio::join!(h.controller.run(&invocation, cancel.clone()), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });
    let report = report.unwrap();

    assert_eq!(report.status, RunStatus::Aborted);
    assert!(!report.notified);
    assert!(h.outbox.sent().is_empty());
    assert_eq!(h.runtime.removed(), vec!["c1"]);
    assert_eq!((h.acquired(), h.released()), (1, 1));
    assert_eq!(h.controller.running_count(), 0);
}

fn docker_pipeline(options: PipelineOptions) -> Pipeline {
    Pipeline::builder("demo")
        .options(options)
        .stage(
            Stage::new("build", vec![Step::shell("echo never")])
                .with_agent(AgentSpec::docker("python:3.11")),
        )
        .on_failure_email(
            EmailNotification::new()
                .recipient(RecipientProvider::Static(vec!["dev@example.org".to_string()])),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_hung_container_start_times_out() {
    let options = PipelineOptions::new().with_timeout(Duration::from_secs(1));
    let h = Harness::with_runtime(
        docker_pipeline(options),
        CountingRuntime::slow(Duration::from_secs(3600)),
    );
    let invocation = manual();

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        h.controller.run(&invocation, CancellationToken::new()),
    )
    .await
    .expect("run finishes despite the hung runtime")
    .unwrap();

    assert_eq!(report.status, RunStatus::TimedOut);
    assert!(report.duration < Duration::from_secs(5));
    assert!(report.notified);
    assert!(h.shell.executed().is_empty());
    assert_eq!(h.acquired(), 0);
    assert_eq!(h.controller.running_count(), 0);
    assert_eq!(
        h.controller.history().latest().map(|r| r.status),
        Some(RunStatus::TimedOut)
    );
}

#[tokio::test]
async fn test_cancel_during_hung_container_start_aborts() {
    let h = Harness::with_runtime(
        docker_pipeline(PipelineOptions::new()),
        CountingRuntime::slow(Duration::from_secs(3600)),
    );
    let cancel = CancellationToken::new();
    let invocation = manual();

    let (report, ()) = tokio::join!(h.controller.run(&invocation, cancel.clone()), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });
    let report = report.unwrap();

    assert_eq!(report.status, RunStatus::Aborted);
    assert!(report.duration < Duration::from_secs(5));
    assert!(!report.notified);
    assert!(h.shell.executed().is_empty());
}

#[tokio::test]
async fn test_container_started_after_timeout_is_released() {
    let options = PipelineOptions::new().with_timeout(Duration::from_secs(1));
    let h = Harness::with_runtime(
        docker_pipeline(options),
        CountingRuntime::slow(Duration::from_millis(1500)),
    );

    let report = h.controller.run(&manual(), CancellationToken::new()).await.unwrap();
    assert_eq!(report.status, RunStatus::TimedOut);
    assert_eq!(h.acquired(), 0);

    for _ in 0..100 {
        if h.released() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!((h.acquired(), h.released()), (1, 1));
    assert_eq!(h.runtime.removed(), vec!["c1"]);
    assert!(h.shell.executed().is_empty());
}

#[tokio::test]
async fn test_missing_recipe_fails_without_running_steps() {
    let h = Harness::bare(demo_pipeline());
    let invocation = InvocationContext::new("plenoptic")
        .with_cause(Cause::Timer)
        .with_branch("main")
        .with_change(Change::new("Ada", "Speed up pyramid tests").with_email("ada@example.org"));

    let report = h.controller.run(&invocation, CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.stage.as_deref(), Some("weekly"));
    assert!(report.error.unwrap().contains("recipe"));
    assert!(h.shell.executed().is_empty());
    assert_eq!((h.acquired(), h.released()), (0, 0));

    let sent = h.outbox.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["ada@example.org"]);
    assert_eq!(sent[0].reply_to.as_deref(), Some("ci@example.org"));
    assert!(sent[0].body.contains("Speed up pyramid tests"));
}

#[tokio::test]
async fn test_ambiguous_selection_fails_before_provisioning() {
    // Both globs match "feat-fix" but no probe of the finite trigger space does.
    let pipeline = Pipeline::builder("demo")
        .stage(
            Stage::new("features", vec![Step::shell("echo f")])
                .with_when(WhenCondition::branch("feat*")),
        )
        .stage(
            Stage::new("fixes", vec![Step::shell("echo x")])
                .with_when(WhenCondition::branch("*-fix")),
        )
        .build()
        .unwrap();
    let h = Harness::new(pipeline);
    let invocation = InvocationContext::new("demo")
        .with_cause(Cause::Scm)
        .with_branch("feat-fix");

    let report = h.controller.run(&invocation, CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.stage, None);
    assert!(report.error.unwrap().contains("features"));
    assert_eq!(h.acquired(), 0);
    assert!(h.shell.executed().is_empty());
}

#[tokio::test]
async fn test_stage_environment_overrides_pipeline() {
    let pipeline = Pipeline::builder("demo")
        .environment(|env| env.set("MODE", "global").set("LEVEL", "1"))
        .stage(
            Stage::new("build", vec![Step::shell("env")])
                .with_environment(Environment::new().set("MODE", "stage").set("TAG", "${MODE}-${LEVEL}")),
        )
        .build()
        .unwrap();
    let h = Harness::new(pipeline);

    h.controller.run(&manual(), CancellationToken::new()).await.unwrap();

    let env = &h.shell.envs()[0];
    assert_eq!(env["MODE"], "stage");
    assert_eq!(env["TAG"], "stage-1");
    assert_eq!(env["STAGE_NAME"], "build");
    assert_eq!(env["WORKSPACE"], h.workspace.path().display().to_string());
}

#[tokio::test]
async fn test_requestor_of_manual_build_is_notified() {
    let pipeline = Pipeline::builder("demo")
        .stage(Stage::new("build", vec![Step::shell("exit 1")]))
        .on_failure_email(EmailNotification::new().recipient(RecipientProvider::Requestor))
        .build()
        .unwrap();
    let h = Harness::new(pipeline);
    let invocation = InvocationContext::new("demo").with_cause(Cause::User {
        user_id: "ada".to_string(),
        email: Some("ada@example.org".to_string()),
    });

    let report = h.controller.run(&invocation, CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(h.outbox.sent()[0].to, vec!["ada@example.org"]);
}

#[tokio::test]
async fn test_retention_keeps_newest_builds() {
    let options = PipelineOptions::new().with_build_discarder(BuildDiscarder::new(2));
    let h = Harness::new(manual_pipeline(&["echo ok"], options));

    for _ in 0..4 {
        h.controller.run(&manual(), CancellationToken::new()).await.unwrap();
    }

    assert_eq!(h.controller.history().build_numbers(), vec![3, 4]);
    assert_eq!((h.acquired(), h.released()), (4, 4));
}

#[tokio::test]
async fn test_queue_policy_serializes_runs() {
    let options =
        PipelineOptions::new().with_disable_concurrent_builds(ConcurrencyPolicy::Queue);
    let h = Harness::new(manual_pipeline(&["sleep-ms 200"], options));
    let invocation = manual();

    let (first, second) = tokio::join!(
        h.controller.run(&invocation, CancellationToken::new()),
        h.controller.run(&invocation, CancellationToken::new()),
    );

    assert_eq!(first.unwrap().status, RunStatus::Succeeded);
    assert_eq!(second.unwrap().status, RunStatus::Succeeded);
    assert_eq!(h.shell.max_concurrent(), 1);
    assert_eq!(h.controller.history().len(), 2);
}

#[tokio::test]
async fn test_concurrent_runs_overlap_when_allowed() {
    let h = Harness::new(manual_pipeline(&["sleep-ms 300"], PipelineOptions::new()));
    let invocation = manual();

    let (first, second) = tokio::join!(
        h.controller.run(&invocation, CancellationToken::new()),
        h.controller.run(&invocation, CancellationToken::new()),
    );

    assert!(first.unwrap().is_success());
    assert!(second.unwrap().is_success());
    assert_eq!(h.shell.max_concurrent(), 2);
}

#[tokio::test]
async fn test_reject_policy_refuses_second_run() {
    let options =
        PipelineOptions::new().with_disable_concurrent_builds(ConcurrencyPolicy::Reject);
    let h = Harness::new(manual_pipeline(&["sleep-ms 500"], options));
    let invocation = manual();

    let (first, second) = tokio::join!(
        h.controller.run(&invocation, CancellationToken::new()),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            h.controller.run(&invocation, CancellationToken::new()).await
        },
    );

    assert_eq!(first.unwrap().status, RunStatus::Succeeded);
    assert!(matches!(
        second,
        Err(PipelineError::ConcurrentRunRejected { ref pipeline }) if pipeline == "demo"
    ));

    let history = h.controller.history();
    assert_eq!(history.get(2).map(|r| r.status), Some(RunStatus::Aborted));
    assert_eq!(h.acquired(), 1);
}
