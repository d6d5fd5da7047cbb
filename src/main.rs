//! runline - Run declarative CI/CD pipelines
//!
//! ## Commands
//!
//! - `runline check` - Validate a pipeline and show which stage each trigger selects
//! - `runline run` - Execute one invocation of a pipeline
//!
//! ## Quick Start
//!
//! ```bash
//! # Validate a pipeline
//! runline check demos/pipeline.yaml
//!
//! # Run the stage a weekly timer would select
//! runline run demos/pipeline.yaml --cause timer --branch main
//!
//! # Replay a recorded invocation with podman
//! RUNLINE_CONTAINER_RUNTIME=podman runline run demos/pipeline.yaml -i demos/invocation.json
//! ```

use std::process::ExitCode;

mod cli;

fn main() -> ExitCode {
    match cli::run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if std::env::var("RUNLINE_VERBOSE").is_ok() {
                eprintln!("{e:?}");
            }
            ExitCode::FAILURE
        }
    }
}
