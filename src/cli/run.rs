//! `runline run` - Execute a pipeline once
//!
//! Builds the invocation context from an optional JSON file plus flags, runs
//! it with the real shell, container and mail boundaries, and reports the
//! terminal status. Ctrl-C aborts the run; agents are still released.
//!
//! ## Usage
//!
//! ```bash
//! runline run demos/pipeline.yaml --cause timer --branch main
//! runline run demos/pipeline.yaml --invocation demos/invocation.json
//! ```

use anyhow::{Context, Result};
use clap::ValueEnum;
use runline::executor::{
    Cause, Change, ContainerRuntime, InvocationContext, LocalShell, PipelineController, RunReport,
    Services,
};
use runline::infrastructure::Config;
use runline::pipeline::Pipeline;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Trigger cause given on the command line
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum CauseArg {
    /// Cron schedule
    Timer,
    /// Source-control event
    Scm,
    /// Manual start
    Manual,
}

/// Flags of `runline run`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Invocation context file (JSON)
    pub invocation: Option<PathBuf>,
    /// Cause override
    pub cause: Option<CauseArg>,
    /// Branch override
    pub branch: Option<String>,
    /// Build number override
    pub build_number: Option<u64>,
    /// Project name override
    pub project: Option<String>,
    /// Requesting user
    pub requested_by: Option<String>,
    /// Changes as `author:message`
    pub changes: Vec<String>,
}

fn parse_change(raw: &str) -> Result<Change> {
    let (author, message) = raw
        .split_once(':')
        .with_context(|| format!("Invalid change '{raw}', expected author:message"))?;
    let change = Change::new(author.trim(), message.trim());
    Ok(if author.contains('@') {
        change.with_email(author.trim())
    } else {
        change
    })
}

/// Assembles the invocation context from the file and flag overrides
pub fn build_invocation(pipeline: &Pipeline, options: &RunOptions) -> Result<InvocationContext> {
    let mut invocation = match options.invocation {
        Some(ref path) => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read invocation file: {}", path.display()))?;
            InvocationContext::from_json(&source).context("Invalid invocation file")?
        }
        None => InvocationContext::default(),
    };

    if let Some(ref project) = options.project {
        invocation.project.clone_from(project);
    }
    if invocation.project.is_empty() {
        invocation.project.clone_from(&pipeline.name);
    }
    if let Some(ref branch) = options.branch {
        invocation.branch.clone_from(branch);
    }
    if let Some(number) = options.build_number {
        invocation.build_number = Some(number);
    }
    if let Some(ref user) = options.requested_by {
        invocation.requested_by = Some(user.clone());
    }
    if let Some(cause) = options.cause {
        let record = match cause {
            CauseArg::Timer => Cause::Timer,
            CauseArg::Scm => Cause::Scm,
            CauseArg::Manual => Cause::User {
                user_id: options.requested_by.clone().unwrap_or_default(),
                email: None,
            },
        };
        invocation.causes.insert(0, record);
    }
    for raw in &options.changes {
        invocation.changes.push(parse_change(raw)?);
    }

    Ok(invocation)
}

/// Runs a pipeline file once
pub async fn run_pipeline(config: &Config, file: &Path, options: &RunOptions) -> Result<RunReport> {
    let pipeline = Pipeline::from_file(file)
        .with_context(|| format!("Failed to load pipeline: {}", file.display()))?;
    let invocation = build_invocation(&pipeline, options)?;

    let workspace = std::fs::canonicalize(&config.workspace)
        .with_context(|| format!("Workspace not found: {}", config.workspace.display()))?;

    let cli = config.container_runtime();
    let version = cli.version().await;
    let runtime = match version {
        Some(version) => {
            tracing::info!(runtime = %version, "Container runtime available");
            Some(cli as Arc<dyn ContainerRuntime>)
        }
        None => {
            tracing::warn!(
                runtime = %config.container_runtime,
                "Container runtime not available, only host agents can run"
            );
            None
        }
    };

    let services = Services {
        shell: Arc::new(LocalShell::new()),
        runtime,
        mail: config.mail_transport(),
        from_address: config.from_address.clone(),
    };
    let controller = PipelineController::new(pipeline, workspace, services)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, aborting run");
            on_signal.cancel();
        }
    });

    let report = controller.run(&invocation, cancel).await?;
    Ok(report)
}
