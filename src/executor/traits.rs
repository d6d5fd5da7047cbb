//! External boundaries of the orchestrator
//!
//! The core never builds images, interprets scripts or talks SMTP itself. It
//! reaches those capabilities through the traits in this module so that tests
//! and alternative backends can stand in for the real ones.

use super::errors::{ContainerError, MailError, ShellError};
use super::log::LogBuffer;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Image build request for a Dockerfile recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Build context (the recipe directory)
    pub context_dir: PathBuf,
    /// Dockerfile path
    pub dockerfile: PathBuf,
    /// Tag to apply
    pub tag: String,
    /// Extra build arguments
    pub build_args: Vec<String>,
}

/// Container start request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    /// Image to run
    pub image: String,
    /// Container name
    pub name: String,
    /// Resource arguments (`--gpus all`, `--cpus 4`, ...)
    pub args: Vec<String>,
    /// Host paths mounted at the same path inside the container
    pub mounts: Vec<PathBuf>,
    /// Working directory inside the container
    pub workdir: PathBuf,
}

/// Container build/run capability
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Builds (or reuses) an image and returns its reference
    async fn build_image(&self, request: &BuildRequest) -> Result<String, ContainerError>;

    /// Starts a long-lived container and returns its id
    async fn start(&self, request: &StartRequest) -> Result<String, ContainerError>;

    /// Command prefix that executes a program inside the container
    fn exec_prefix(
        &self,
        container_id: &str,
        env: &BTreeMap<String, String>,
        workdir: &std::path::Path,
    ) -> Vec<String>;

    /// Stops and removes a container
    async fn remove(&self, container_id: &str) -> Result<(), ContainerError>;
}

/// One script execution request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellInvocation {
    /// Script text, including its shebang line
    pub script: String,
    /// Interpreter named by the shebang
    pub interpreter: String,
    /// Environment for the process
    pub env: BTreeMap<String, String>,
    /// Working directory
    pub cwd: PathBuf,
    /// Directory the script file may be written to
    pub scratch_dir: PathBuf,
    /// Command prefix to run the script through (empty on the host)
    pub exec_prefix: Vec<String>,
}

/// Result of shell command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellResult {
    /// Exit code, -1 when killed by a signal
    pub exit_code: i32,
    /// Duration of execution
    pub duration: Duration,
}

impl ShellResult {
    /// Returns true if command succeeded (exit code 0)
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Shell/script interpreter capability
#[async_trait]
pub trait ShellRunner: Send + Sync {
    /// Runs a script, appending its output to `log` line by line.
    ///
    /// Dropping the returned future must stop the process.
    async fn run(
        &self,
        invocation: &ShellInvocation,
        log: &LogBuffer,
    ) -> Result<ShellResult, ShellError>;
}

/// A rendered e-mail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    /// Sender address, transport default when absent
    pub from: Option<String>,
    /// Recipients
    pub to: Vec<String>,
    /// Reply-To address
    pub reply_to: Option<String>,
    /// Subject line
    pub subject: String,
    /// Plain text body
    pub body: String,
}

impl MailMessage {
    /// Formats the message as RFC 5322 text
    #[must_use]
    pub fn to_rfc5322(&self) -> String {
        let mut out = String::new();
        if let Some(ref from) = self.from {
            out.push_str(&format!("From: {}\n", header_value(from)));
        }
        let to: Vec<String> = self.to.iter().map(|r| header_value(r)).collect();
        out.push_str(&format!("To: {}\n", to.join(", ")));
        if let Some(ref reply_to) = self.reply_to {
            out.push_str(&format!("Reply-To: {}\n", header_value(reply_to)));
        }
        out.push_str(&format!("Subject: {}\n", header_value(&self.subject)));
        out.push_str("Content-Type: text/plain; charset=utf-8\n\n");
        out.push_str(&self.body);
        if !self.body.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

/// Folds line breaks into spaces so a value stays within its header line
fn header_value(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// Mail delivery capability
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Delivers a message
    async fn send(&self, message: &MailMessage) -> Result<(), MailError>;
}
