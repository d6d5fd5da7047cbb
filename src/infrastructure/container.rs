//! Container runtime backed by the Docker or Podman CLI
//!
//! Agents are long-lived containers started with `cat` as their main process
//! and a TTY, so they stay up until removed; steps are run with `exec`.

use crate::executor::{BuildRequest, ContainerError, ContainerRuntime, StartRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use tokio::process::Command;

/// Container engine binary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerEngine {
    /// Docker runtime
    #[default]
    Docker,
    /// Podman runtime
    Podman,
}

impl ContainerEngine {
    /// Executable name
    #[must_use]
    pub fn command(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

impl std::fmt::Display for ContainerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command())
    }
}

impl std::str::FromStr for ContainerEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            other => Err(format!("unknown container runtime '{other}'")),
        }
    }
}

/// [`ContainerRuntime`] that shells out to `docker` or `podman`
#[derive(Debug, Clone, Default)]
pub struct DockerCli {
    engine: ContainerEngine,
}

impl DockerCli {
    /// Creates a runtime for an engine
    #[must_use]
    pub fn new(engine: ContainerEngine) -> Self {
        Self { engine }
    }

    /// Engine version, `None` when the binary is missing or broken
    pub async fn version(&self) -> Option<String> {
        self.invoke("version", vec!["--version".to_string()])
            .await
            .ok()
            .map(|out| out.trim().to_string())
    }

    async fn invoke(&self, subcommand: &str, args: Vec<String>) -> Result<String, ContainerError> {
        tracing::debug!(engine = %self.engine, args = ?args, "Invoking container runtime");

        let output = match Command::new(self.engine.command()).args(&args).output().await {
            Ok(output) => output,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ContainerError::NotAvailable(self.engine.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        if !output.status.success() {
            return Err(ContainerError::CommandFailed {
                command: subcommand.to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn build_args(request: &BuildRequest) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "-t".to_string(),
            request.tag.clone(),
            "-f".to_string(),
            request.dockerfile.display().to_string(),
        ];
        args.extend(request.build_args.iter().cloned());
        args.push(request.context_dir.display().to_string());
        args
    }

    fn run_args(&self, request: &StartRequest) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "-t".to_string(),
            "--name".to_string(),
            request.name.clone(),
        ];
        // For Podman, use cgroups v2 compatibility
        if self.engine == ContainerEngine::Podman {
            args.push("--cgroup-manager=cgroupfs".to_string());
        }
        for mount in &request.mounts {
            let path = mount.display();
            args.push("-v".to_string());
            args.push(format!("{path}:{path}"));
        }
        args.push("-w".to_string());
        args.push(request.workdir.display().to_string());
        args.extend(request.args.iter().cloned());
        args.push(request.image.clone());
        args.push("cat".to_string());
        args
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn build_image(&self, request: &BuildRequest) -> Result<String, ContainerError> {
        let inspect = vec![
            "image".to_string(),
            "inspect".to_string(),
            request.tag.clone(),
        ];
        if self.invoke("inspect", inspect).await.is_ok() {
            tracing::info!(image = %request.tag, "Reusing agent image");
            return Ok(request.tag.clone());
        }

        self.invoke("build", Self::build_args(request)).await?;
        Ok(request.tag.clone())
    }

    async fn start(&self, request: &StartRequest) -> Result<String, ContainerError> {
        let id = self.invoke("run", self.run_args(request)).await?;
        Ok(id.trim().to_string())
    }

    fn exec_prefix(
        &self,
        container_id: &str,
        env: &BTreeMap<String, String>,
        workdir: &Path,
    ) -> Vec<String> {
        let mut prefix = vec![self.engine.command().to_string(), "exec".to_string()];
        for (key, value) in env {
            prefix.push("-e".to_string());
            prefix.push(format!("{key}={value}"));
        }
        prefix.push("-w".to_string());
        prefix.push(workdir.display().to_string());
        prefix.push(container_id.to_string());
        prefix
    }

    async fn remove(&self, container_id: &str) -> Result<(), ContainerError> {
        self.invoke("rm", vec!["rm".to_string(), "-f".to_string(), container_id.to_string()])
            .await
            .map(|_| ())
    }
}
