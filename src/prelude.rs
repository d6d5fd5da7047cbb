//! Prelude module for common imports

// Re-export all pipeline types with full paths
pub use crate::pipeline::agent::{AgentSpec, DockerConfig, DockerfileConfig};
pub use crate::pipeline::environment::{DerivedValue, EnvDeclaration, EnvValue, Environment};
pub use crate::pipeline::errors::{PipelineError, ValidationError};
pub use crate::pipeline::options::{BuildDiscarder, ConcurrencyPolicy, PipelineOptions, Timeout};
pub use crate::pipeline::pipeline_def::{Pipeline, PipelineBuilder};
pub use crate::pipeline::post::{EmailNotification, Post, RecipientProvider};
pub use crate::pipeline::stage::{Stage, StageBuilder, WhenCondition};
pub use crate::pipeline::steps::Step;
pub use crate::pipeline::types::{RunStatus, TriggerCause, TriggerFacts, Validate};

// Re-export executor types
pub use crate::executor::{
    Cause, Change, ContainerRuntime, InvocationContext, LogBuffer, MailTransport,
    PipelineController, RunReport, Services, ShellRunner,
};
