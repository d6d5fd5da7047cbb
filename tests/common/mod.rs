//! Fakes for the execution boundaries shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use runline::executor::{
    BuildRequest, ContainerError, ContainerRuntime, LogBuffer, MailError, MailMessage,
    MailTransport, PipelineController, Services, ShellError, ShellInvocation, ShellResult,
    ShellRunner, StartRequest,
};
use runline::pipeline::Pipeline;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

pub const DEMO_PIPELINE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/pipeline.yaml");
pub const DEMO_INVOCATION: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/invocation.json");

pub fn demo_pipeline() -> Pipeline {
    Pipeline::from_file(DEMO_PIPELINE).unwrap()
}

struct Active<'a>(&'a AtomicUsize);

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Shell that interprets the last script line instead of running it:
/// `exit N` exits with N, `sleep-ms N` sleeps N milliseconds, anything else
/// succeeds.
#[derive(Default)]
pub struct ScriptedShell {
    scripts: Mutex<Vec<String>>,
    envs: Mutex<Vec<BTreeMap<String, String>>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedShell {
    pub fn executed(&self) -> Vec<String> {
        self.scripts.lock().clone()
    }

    pub fn envs(&self) -> Vec<BTreeMap<String, String>> {
        self.envs.lock().clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShellRunner for ScriptedShell {
    async fn run(
        &self,
        invocation: &ShellInvocation,
        log: &LogBuffer,
    ) -> Result<ShellResult, ShellError> {
        let body = invocation.script.lines().last().unwrap_or("").trim().to_string();
        self.scripts.lock().push(body.clone());
        self.envs.lock().push(invocation.env.clone());

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _active = Active(&self.active);

        log.push(format!("$ {body}"));
        let exit_code = if let Some(ms) = body.strip_prefix("sleep-ms ") {
            tokio::time::sleep(Duration::from_millis(ms.parse().unwrap())).await;
            0
        } else if let Some(code) = body.strip_prefix("exit ") {
            code.parse().unwrap()
        } else {
            0
        };

        Ok(ShellResult {
            exit_code,
            duration: Duration::ZERO,
        })
    }
}

/// Container runtime that only records what it was asked to do
#[derive(Default)]
pub struct CountingRuntime {
    builds: Mutex<Vec<String>>,
    started: Mutex<Vec<StartRequest>>,
    removed: Mutex<Vec<String>>,
    next: AtomicUsize,
    start_delay: Duration,
}

impl CountingRuntime {
    /// Runtime whose container start takes `start_delay`
    pub fn slow(start_delay: Duration) -> Self {
        Self {
            start_delay,
            ..Self::default()
        }
    }

    pub fn builds(&self) -> Vec<String> {
        self.builds.lock().clone()
    }

    pub fn started(&self) -> Vec<StartRequest> {
        self.started.lock().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().clone()
    }
}

#[async_trait]
impl ContainerRuntime for CountingRuntime {
    async fn build_image(&self, request: &BuildRequest) -> Result<String, ContainerError> {
        self.builds.lock().push(request.tag.clone());
        Ok(request.tag.clone())
    }

    async fn start(&self, request: &StartRequest) -> Result<String, ContainerError> {
        tokio::time::sleep(self.start_delay).await;
        self.started.lock().push(request.clone());
        Ok(format!("c{}", self.next.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn exec_prefix(
        &self,
        container_id: &str,
        _env: &BTreeMap<String, String>,
        _workdir: &Path,
    ) -> Vec<String> {
        vec!["exec".to_string(), container_id.to_string()]
    }

    async fn remove(&self, container_id: &str) -> Result<(), ContainerError> {
        self.removed.lock().push(container_id.to_string());
        Ok(())
    }
}

/// Mail transport keeping every message
#[derive(Default)]
pub struct Outbox {
    sent: Mutex<Vec<MailMessage>>,
}

impl Outbox {
    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MailTransport for Outbox {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

/// A controller wired to the fakes, over a scratch workspace
pub struct Harness {
    pub shell: Arc<ScriptedShell>,
    pub runtime: Arc<CountingRuntime>,
    pub outbox: Arc<Outbox>,
    pub workspace: TempDir,
    pub controller: PipelineController,
}

impl Harness {
    /// Workspace contains the `jenkins/Dockerfile` recipe the demo uses
    pub fn new(pipeline: Pipeline) -> Self {
        let workspace = TempDir::new().unwrap();
        std::fs::create_dir(workspace.path().join("jenkins")).unwrap();
        std::fs::write(
            workspace.path().join("jenkins/Dockerfile"),
            "FROM python:3.11\n",
        )
        .unwrap();
        Self::with_parts(pipeline, workspace, CountingRuntime::default())
    }

    /// Empty workspace
    pub fn bare(pipeline: Pipeline) -> Self {
        Self::with_parts(pipeline, TempDir::new().unwrap(), CountingRuntime::default())
    }

    /// Empty workspace, containers served by `runtime`
    pub fn with_runtime(pipeline: Pipeline, runtime: CountingRuntime) -> Self {
        Self::with_parts(pipeline, TempDir::new().unwrap(), runtime)
    }

    fn with_parts(pipeline: Pipeline, workspace: TempDir, runtime: CountingRuntime) -> Self {
        let shell = Arc::new(ScriptedShell::default());
        let runtime = Arc::new(runtime);
        let outbox = Arc::new(Outbox::default());
        let services = Services {
            shell: shell.clone(),
            runtime: Some(runtime.clone() as Arc<dyn ContainerRuntime>),
            mail: outbox.clone(),
            from_address: Some("ci@example.org".to_string()),
        };
        let controller = PipelineController::new(pipeline, workspace.path(), services).unwrap();
        Self {
            shell,
            runtime,
            outbox,
            workspace,
            controller,
        }
    }

    pub fn acquired(&self) -> usize {
        self.controller.provisioner().acquired_count()
    }

    pub fn released(&self) -> usize {
        self.controller.provisioner().released_count()
    }
}
