//! Error types for the execution layer

use crate::pipeline::TriggerFacts;
use std::path::PathBuf;
use thiserror::Error;

/// Outcome of stage selection other than a single eligible stage
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    /// Nothing to do for this trigger; the run succeeds as a no-op
    #[error("No stage is eligible for {facts}")]
    NoStage {
        /// Trigger that matched nothing.
        facts: TriggerFacts,
    },

    /// More than one predicate matched; the definition is defective
    #[error("Stages {stages:?} are all eligible for {facts}")]
    Ambiguous {
        /// Trigger that matched several stages.
        facts: TriggerFacts,
        /// Names of every eligible stage, in declaration order.
        stages: Vec<String>,
    },
}

/// Errors raised by a container runtime boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContainerError {
    /// Runtime binary missing or not responding
    #[error("Container runtime '{0}' is not available")]
    NotAvailable(String),

    /// Runtime command exited non-zero
    #[error("'{command}' failed with exit code {code}: {stderr}")]
    CommandFailed {
        /// Subcommand that failed (`build`, `run`, `rm`).
        command: String,
        /// Exit code, -1 when killed by a signal.
        code: i32,
        /// Standard error of the runtime.
        stderr: String,
    },

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ContainerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Agent could not be acquired
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    /// Recipe directory or Dockerfile does not exist
    #[error("Build recipe not found: {}", path.display())]
    RecipeMissing {
        /// Missing path.
        path: PathBuf,
    },

    /// Resource arguments could not be parsed
    #[error("Invalid agent arguments: {0}")]
    InvalidArgs(String),

    /// Image build failed
    #[error("Failed to build image '{image}': {source}")]
    Build {
        /// Tag being built.
        image: String,
        /// Runtime failure.
        source: ContainerError,
    },

    /// Container could not be started with the requested resources
    #[error("Failed to start agent from '{image}': {source}")]
    Start {
        /// Image being started.
        image: String,
        /// Runtime failure.
        source: ContainerError,
    },

    /// Acquisition task did not complete
    #[error("Agent acquisition task failed: {0}")]
    Task(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProvisionError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Executor-level step fault, as opposed to a non-zero exit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShellError {
    /// Shebang interpreter does not exist
    #[error("Interpreter not found: {interpreter}")]
    InterpreterNotFound {
        /// Interpreter from the shebang line.
        interpreter: String,
    },

    /// Process could not be spawned
    #[error("Failed to spawn step: {0}")]
    Spawn(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ShellError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Mail delivery failure; logged by the notifier, never propagated
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    /// Transport rejected or failed the message
    #[error("Mail transport failed: {0}")]
    Transport(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for MailError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
