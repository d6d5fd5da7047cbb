//! Agent provisioning
//!
//! An agent is the execution context of one stage: a fresh temporary
//! directory, plus a long-lived container when the stage asks for one. Agents
//! are acquired through [`Provisioner::scoped`], which races acquisition and
//! body against an interruption (deadline, cancellation) and releases the
//! agent on every return path. Acquisition runs in its own task; an agent that
//! arrives after the interruption is released in the background. A handle
//! dropped without release removes its temp dir immediately and schedules
//! container removal on the current tokio runtime.

use super::errors::{ContainerError, ProvisionError};
use super::traits::{BuildRequest, ContainerRuntime, ShellInvocation, StartRequest};
use crate::pipeline::{AgentSpec, DockerfileConfig, Step};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use uuid::Uuid;

/// What the agent is being acquired for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    /// Workspace directory; recipe paths are relative to it
    pub workspace: PathBuf,
    /// Project name, used for image tags and container names
    pub project: String,
    /// Build number of the run
    pub build_number: u64,
    /// Stage the agent serves
    pub stage: String,
}

#[derive(Default)]
struct Counters {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

#[derive(Clone)]
struct ContainerExec {
    id: String,
    runtime: Arc<dyn ContainerRuntime>,
}

impl fmt::Debug for ContainerExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerExec").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Borrowed view of a live agent, handed to the step executor
#[derive(Debug, Clone)]
pub struct AgentContext {
    temp_dir: PathBuf,
    workspace: PathBuf,
    container: Option<ContainerExec>,
}

impl AgentContext {
    /// Creates a host context; steps run directly in `workspace`
    #[must_use]
    pub fn host(workspace: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            workspace: workspace.into(),
            container: None,
        }
    }

    /// Per-stage temporary directory
    #[must_use]
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Workspace directory
    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Container id, when the agent is a container
    #[must_use]
    pub fn container_id(&self) -> Option<&str> {
        self.container.as_ref().map(|c| c.id.as_str())
    }

    /// Shell invocation running `step` on this agent
    #[must_use]
    pub fn invocation(&self, step: &Step, env: &BTreeMap<String, String>) -> ShellInvocation {
        let exec_prefix = self
            .container
            .as_ref()
            .map(|c| c.runtime.exec_prefix(&c.id, env, &self.workspace))
            .unwrap_or_default();

        ShellInvocation {
            script: step.script_with_shebang(),
            interpreter: step.shebang(),
            env: env.clone(),
            cwd: self.workspace.clone(),
            scratch_dir: self.temp_dir.clone(),
            exec_prefix,
        }
    }
}

/// Exclusively owned agent of one stage
pub struct AgentHandle {
    label: String,
    workspace: PathBuf,
    temp_dir: Option<TempDir>,
    container: Option<ContainerExec>,
    counters: Arc<Counters>,
    released: bool,
}

impl AgentHandle {
    /// Context passed to the steps
    #[must_use]
    pub fn context(&self) -> AgentContext {
        AgentContext {
            temp_dir: self
                .temp_dir
                .as_ref()
                .map(|t| t.path().to_path_buf())
                .unwrap_or_default(),
            workspace: self.workspace.clone(),
            container: self.container.clone(),
        }
    }
}

impl fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentHandle")
            .field("label", &self.label)
            .field("container", &self.container)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Drop for AgentHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        tracing::warn!(agent = %self.label, "Agent dropped without release, cleaning up");

        drop(self.temp_dir.take());
        if let Some(container) = self.container.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        if let Err(err) = container.runtime.remove(&container.id).await {
                            tracing::warn!(container = %container.id, error = %err, "Failed to remove container");
                        }
                    });
                }
                Err(_) => {
                    tracing::warn!(container = %container.id, "No runtime to remove container, it is leaked");
                }
            }
        }
    }
}

/// Result of an acquisition raced against an interruption
#[derive(Debug)]
pub enum Acquisition<R> {
    /// The agent is ready
    Ready(AgentHandle),
    /// The interruption completed first
    Interrupted(R),
}

/// Result of a scoped body raced against an interruption
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scoped<T, R> {
    /// The body ran to completion
    Completed(T),
    /// The interruption completed first, during acquisition or the body
    Interrupted(R),
}

/// Acquires and releases agents
#[derive(Clone)]
pub struct Provisioner {
    runtime: Option<Arc<dyn ContainerRuntime>>,
    counters: Arc<Counters>,
}

impl fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provisioner")
            .field("has_runtime", &self.runtime.is_some())
            .field("acquired", &self.acquired_count())
            .field("released", &self.released_count())
            .finish()
    }
}

impl Provisioner {
    /// Creates a provisioner backed by a container runtime
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime: Some(runtime),
            counters: Arc::default(),
        }
    }

    /// Creates a provisioner that can only serve host agents
    #[must_use]
    pub fn host_only() -> Self {
        Self {
            runtime: None,
            counters: Arc::default(),
        }
    }

    /// Number of agents acquired so far
    #[must_use]
    pub fn acquired_count(&self) -> usize {
        self.counters.acquired.load(Ordering::SeqCst)
    }

    /// Number of agents released so far, including drop-guard releases
    #[must_use]
    pub fn released_count(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }

    fn runtime(&self, image: &str) -> Result<&Arc<dyn ContainerRuntime>, ProvisionError> {
        self.runtime.as_ref().ok_or_else(|| ProvisionError::Start {
            image: image.to_string(),
            source: ContainerError::NotAvailable("no container runtime configured".to_string()),
        })
    }

    /// Acquires an agent for one stage
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the recipe is missing, the image cannot
    /// be built, or the container cannot be started with the requested
    /// resources. Nothing is retried.
    pub async fn acquire(
        &self,
        spec: &AgentSpec,
        request: &ProvisionRequest,
    ) -> Result<AgentHandle, ProvisionError> {
        let (image, raw_args) = match spec {
            AgentSpec::None => (None, ""),
            AgentSpec::Docker(config) => (Some(config.image.clone()), config.args.as_str()),
            AgentSpec::Dockerfile(config) => {
                let image = self.build_image(config, request).await?;
                (Some(image), config.args.as_str())
            }
        };
        let args = shell_words::split(raw_args).map_err(|e| ProvisionError::InvalidArgs(e.to_string()))?;

        let temp_dir = tempfile::Builder::new()
            .prefix(&format!(
                "runline-{}-{}-",
                request.build_number,
                sanitize(&request.stage)
            ))
            .tempdir()?;

        let container = match image {
            None => None,
            Some(image) => {
                let runtime = self.runtime(&image)?;
                let start = StartRequest {
                    image: image.clone(),
                    name: format!(
                        "runline-{}-{}-{}-{}",
                        sanitize(&request.project),
                        request.build_number,
                        sanitize(&request.stage),
                        &Uuid::new_v4().simple().to_string()[..8]
                    ),
                    args,
                    mounts: vec![request.workspace.clone(), temp_dir.path().to_path_buf()],
                    workdir: request.workspace.clone(),
                };
                let id = runtime
                    .start(&start)
                    .await
                    .map_err(|source| ProvisionError::Start { image, source })?;
                Some(ContainerExec {
                    id,
                    runtime: Arc::clone(runtime),
                })
            }
        };

        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        let handle = AgentHandle {
            label: format!("{}#{}:{}", request.stage, request.build_number, spec),
            workspace: request.workspace.clone(),
            temp_dir: Some(temp_dir),
            container,
            counters: Arc::clone(&self.counters),
            released: false,
        };
        tracing::info!(
            agent = %handle.label,
            container = ?handle.container.as_ref().map(|c| &c.id),
            "Agent acquired"
        );
        Ok(handle)
    }

    async fn build_image(
        &self,
        config: &DockerfileConfig,
        request: &ProvisionRequest,
    ) -> Result<String, ProvisionError> {
        let recipe_dir = request.workspace.join(&config.dir);
        if !recipe_dir.is_dir() {
            return Err(ProvisionError::RecipeMissing { path: recipe_dir });
        }
        let dockerfile = recipe_dir.join(&config.filename);
        if !dockerfile.is_file() {
            return Err(ProvisionError::RecipeMissing { path: dockerfile });
        }

        let recipe = tokio::fs::read(&dockerfile).await?;
        let tag = format!(
            "runline/{}-{}:{}",
            sanitize(&request.project),
            sanitize(&request.stage),
            recipe_digest(&recipe, &config.additional_build_args)
        );

        let build_args = shell_words::split(&config.additional_build_args)
            .map_err(|e| ProvisionError::InvalidArgs(e.to_string()))?;
        let runtime = self.runtime(&tag)?;
        tracing::info!(image = %tag, recipe = %recipe_dir.display(), "Building agent image");
        runtime
            .build_image(&BuildRequest {
                context_dir: recipe_dir,
                dockerfile,
                tag: tag.clone(),
                build_args,
            })
            .await
            .map_err(|source| ProvisionError::Build { image: tag, source })
    }

    /// Releases an agent; calling it again is a no-op
    pub async fn release(&self, handle: &mut AgentHandle) {
        if handle.released {
            return;
        }
        handle.released = true;

        if let Some(container) = handle.container.take()
            && let Err(err) = container.runtime.remove(&container.id).await
        {
            tracing::warn!(container = %container.id, error = %err, "Failed to remove container");
        }
        if let Some(temp_dir) = handle.temp_dir.take()
            && let Err(err) = temp_dir.close()
        {
            tracing::warn!(error = %err, "Failed to remove agent temp dir");
        }

        self.counters.released.fetch_add(1, Ordering::SeqCst);
        tracing::info!(agent = %handle.label, "Agent released");
    }

    /// Acquires an agent unless `interrupt` completes first
    ///
    /// The image build and container start run in a spawned task, so an
    /// interrupted acquisition is not torn down halfway. Whatever agent that
    /// task still produces is released as soon as it returns.
    ///
    /// # Errors
    ///
    /// Returns the acquisition error, or [`ProvisionError::Task`] if the
    /// acquisition task panicked.
    pub async fn acquire_until<I>(
        &self,
        spec: &AgentSpec,
        request: &ProvisionRequest,
        interrupt: I,
    ) -> Result<Acquisition<I::Output>, ProvisionError>
    where
        I: Future,
    {
        let mut task = {
            let provisioner = self.clone();
            let spec = spec.clone();
            let request = request.clone();
            tokio::spawn(async move { provisioner.acquire(&spec, &request).await })
        };

        let reason = tokio::select! {
            biased;
            reason = interrupt => reason,
            joined = &mut task => {
                return match joined {
                    Ok(acquired) => acquired.map(Acquisition::Ready),
                    Err(err) => Err(ProvisionError::Task(err.to_string())),
                };
            }
        };

        tracing::warn!(stage = %request.stage, agent = %spec, "Agent acquisition interrupted");
        let provisioner = self.clone();
        tokio::spawn(async move {
            if let Ok(Ok(mut handle)) = task.await {
                provisioner.release(&mut handle).await;
            }
        });
        Ok(Acquisition::Interrupted(reason))
    }

    /// Runs `body` with an agent unless `interrupt` completes first
    ///
    /// `interrupt` is raced against acquisition and then against `body`. The
    /// agent is released whichever finishes first.
    ///
    /// # Errors
    ///
    /// Returns the acquisition error; `body` is not called in that case.
    pub async fn scoped<I, F, Fut, T>(
        &self,
        spec: &AgentSpec,
        request: &ProvisionRequest,
        interrupt: I,
        body: F,
    ) -> Result<Scoped<T, I::Output>, ProvisionError>
    where
        I: Future,
        F: FnOnce(AgentContext) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut interrupt = std::pin::pin!(interrupt);
        let mut handle = match self.acquire_until(spec, request, &mut interrupt).await? {
            Acquisition::Ready(handle) => handle,
            Acquisition::Interrupted(reason) => return Ok(Scoped::Interrupted(reason)),
        };

        let body = body(handle.context());
        let output = tokio::select! {
            biased;
            reason = &mut interrupt => Scoped::Interrupted(reason),
            output = body => Scoped::Completed(output),
        };
        self.release(&mut handle).await;
        Ok(output)
    }
}

/// Content address of a Dockerfile recipe and its build arguments
fn recipe_digest(recipe: &[u8], build_args: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(recipe);
    hasher.update(b"\0");
    hasher.update(build_args.as_bytes());
    hasher.finalize().to_hex()[..16].to_string()
}

/// Lowercases and replaces anything outside `[a-z0-9_.-]` with `-`
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "runline".to_string()
    } else {
        cleaned
    }
}
