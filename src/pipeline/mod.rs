//! Pipeline domain types and logic
//!
//! The declarative side of runline: what a pipeline definition says, before
//! anything is evaluated or executed.

pub mod agent;
pub mod environment;
pub mod errors;
pub mod options;
pub mod pipeline_def;
pub mod post;
pub mod stage;
pub mod steps;
pub mod types;


pub use agent::{AgentSpec, DockerConfig, DockerfileConfig};
pub use environment::{DerivedValue, EnvDeclaration, EnvValue, Environment};
pub use errors::{PipelineError, ValidationError};
pub use options::{BuildDiscarder, ConcurrencyPolicy, PipelineOptions, TimeUnit, Timeout, Trigger};
pub use pipeline_def::{Pipeline, PipelineBuilder};
pub use post::{DEFAULT_LOG_LINES, EmailNotification, FailureActions, Post, RecipientProvider};
pub use stage::{Stage, StageBuilder, UNNAMED_BRANCH, WhenCondition, find_overlap, trigger_space};
pub use steps::{DEFAULT_INTERPRETER, Step};
pub use types::{RunStatus, TriggerCause, TriggerFacts, Validate};
