//! # Runline - A declarative pipeline orchestration core
//!
//! Runline executes Jenkins-style declarative pipelines: a YAML definition
//! names a set of stages guarded by trigger predicates, and every invocation
//! runs at most one of them.
//!
//! ## Quick Start
//!
//! ```bash
//! runline check demos/pipeline.yaml
//! runline run demos/pipeline.yaml --cause timer --branch main
//! ```
//!
//! ## Features
//!
//! - **Trigger evaluation**: Cause and branch facts from an invocation context
//! - **Exclusive stage selection**: Overlapping predicates are rejected at load time
//! - **Agent provisioning**: Host, prebuilt image or Dockerfile-built containers, always released
//! - **Bounded runs**: Whole-run timeout, cancellation and a concurrency gate
//! - **Failure notification**: Templated email to static recipients, culprits or the requestor
//! - **Build retention**: Count and age based discarding of run records
//!
//! ## License
//!
//! Licensed under either of
//! - Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <https://www.apache.org/licenses/LICENSE-2.0>)
//! - MIT license ([LICENSE-MIT](LICENSE-MIT) or <https://opensource.org/licenses/MIT>)
//!
//! at your option.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod executor;
pub mod infrastructure;
pub mod pipeline;

// Prelude module for common imports
pub mod prelude;

// Re-export commonly used types
pub use executor::{
    InvocationContext, LocalShell, PipelineController, RunReport, Services, evaluate, select,
};
pub use infrastructure::{Config, DockerCli};
pub use pipeline::{
    AgentSpec, Pipeline, PipelineBuilder, PipelineError, PipelineOptions, RunStatus, Stage,
    StageBuilder, Step, TriggerCause, TriggerFacts, Validate, WhenCondition,
};

/// Version of the runline crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
