//! Error types for pipeline domain

use super::types::RunStatus;
use thiserror::Error;

/// Errors that can occur during pipeline operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Validation failed with specified reason
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Pipeline definition could not be parsed
    #[error("Failed to parse pipeline definition: {0}")]
    Parse(String),

    /// A run was started while another one held the running slot
    #[error("Pipeline '{pipeline}' already has a running build; concurrent run rejected")]
    ConcurrentRunRejected {
        /// Name of the pipeline.
        pipeline: String,
    },

    /// Illegal state machine transition
    #[error("Invalid run transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: RunStatus,
        /// Requested status.
        to: RunStatus,
    },

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for PipelineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Validation errors for pipeline components
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Name cannot be empty
    #[error("Name cannot be empty")]
    EmptyName,

    /// Name too long
    #[error("Name too long: max {max} characters, got {len}")]
    NameTooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length of the name.
        len: usize,
    },

    /// Invalid characters in name
    #[error("Invalid characters in name: '{name}'")]
    InvalidNameChars {
        /// The invalid name.
        name: String,
    },

    /// Pipeline must have at least one stage
    #[error("Pipeline must have at least one stage")]
    EmptyPipeline,

    /// Two stages share a name
    #[error("Duplicate stage name '{0}'")]
    DuplicateStage(String),

    /// Stage must have at least one step
    #[error("Stage '{stage}' must have at least one step")]
    EmptyStage {
        /// Name of the empty stage.
        stage: String,
    },

    /// Step script is empty
    #[error("Step {index} of stage '{stage}' has an empty script")]
    EmptyScript {
        /// Name of the owning stage.
        stage: String,
        /// Zero-based step position.
        index: usize,
    },

    /// Invalid timeout value
    #[error("Invalid timeout: must be positive, got {value}")]
    InvalidTimeout {
        /// The invalid timeout value.
        value: u64,
    },

    /// Invalid build discarder values
    #[error("Invalid build discarder: {0}")]
    InvalidBuildDiscarder(String),

    /// Invalid agent type
    #[error("Invalid agent type: {0}")]
    InvalidAgentType(String),

    /// Invalid cron expression
    #[error("Invalid cron expression: '{0}'")]
    InvalidCronExpression(String),

    /// Invalid `when` condition
    #[error("Invalid when condition: {0}")]
    InvalidCondition(String),

    /// Two stage predicates can be true for the same trigger
    #[error(
        "Stages '{first}' and '{second}' are both eligible for cause {cause} on branch '{branch}'"
    )]
    OverlappingStages {
        /// First stage in declaration order.
        first: String,
        /// Second stage in declaration order.
        second: String,
        /// Cause that satisfies both predicates.
        cause: String,
        /// Branch that satisfies both predicates.
        branch: String,
    },

    /// Invalid notification configuration
    #[error("Invalid notification: {0}")]
    InvalidNotification(String),
}
