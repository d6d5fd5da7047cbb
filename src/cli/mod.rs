//! Command-line interface for runline
//!
//! - `check`: Validate a pipeline and print its stage selection table
//! - `run`: Execute one pipeline invocation

pub mod check;
pub mod run;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use runline::infrastructure::{Config, init_logging};
use std::path::PathBuf;
use std::process::ExitCode;

/// CLI arguments for runline
#[derive(Parser, Debug)]
#[command(name = "runline")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a pipeline definition
    Check {
        /// Pipeline file to validate
        file: PathBuf,
    },

    /// Execute a pipeline once
    Run {
        /// Pipeline file to run
        file: PathBuf,
        /// Invocation context file (JSON)
        #[arg(short, long)]
        invocation: Option<PathBuf>,
        /// Trigger cause
        #[arg(long, value_enum)]
        cause: Option<run::CauseArg>,
        /// Branch the run is for
        #[arg(short, long)]
        branch: Option<String>,
        /// Build number to use
        #[arg(long)]
        build_number: Option<u64>,
        /// Project name (defaults to the pipeline name)
        #[arg(long)]
        project: Option<String>,
        /// User who requested the run
        #[arg(long)]
        requested_by: Option<String>,
        /// Change in the run, as author:message
        #[arg(long = "change")]
        changes: Vec<String>,
    },
}

/// Parse and execute CLI arguments
pub fn run() -> Result<ExitCode> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.log_level);

    match args.command {
        Command::Check { file } => {
            let (pipeline, rows) = check::check_pipeline(&file)?;
            println!("Pipeline '{}' is valid ({} stages)\n", pipeline.name, pipeline.stage_count());
            print!("{}", check::format_rows(&rows));
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            file,
            invocation,
            cause,
            branch,
            build_number,
            project,
            requested_by,
            changes,
        } => {
            let options = run::RunOptions {
                invocation,
                cause,
                branch,
                build_number,
                project,
                requested_by,
                changes,
            };

            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            let report = runtime.block_on(run::run_pipeline(&config, &file, &options))?;

            for line in &report.log_tail {
                println!("{line}");
            }
            println!("{report}");

            Ok(if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
