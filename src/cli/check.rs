//! `runline check` - Validate a pipeline definition
//!
//! Parses and validates the YAML definition, including the check that no
//! two stage predicates can match the same trigger, then prints which stage
//! every distinguishable trigger would select.
//!
//! ## Usage
//!
//! ```bash
//! runline check demos/pipeline.yaml
//! # Exit code 0: definition is valid
//! # Exit code 1: parse or validation errors found
//! ```

use anyhow::{Context, Result};
use runline::executor::{SelectionError, select};
use runline::pipeline::{Pipeline, TriggerFacts, UNNAMED_BRANCH, trigger_space};
use std::fmt::Write as _;
use std::path::Path;

/// What one trigger resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionRow {
    /// Probed trigger
    pub facts: TriggerFacts,
    /// Selected stage, `-` for none
    pub stage: String,
}

/// Validates a pipeline file and returns its selection table
pub fn check_pipeline(file: &Path) -> Result<(Pipeline, Vec<SelectionRow>)> {
    tracing::debug!(file = %file.display(), "Validating pipeline");

    if !file.exists() {
        anyhow::bail!("Pipeline file not found: {}", file.display());
    }

    let pipeline = Pipeline::from_file(file)
        .with_context(|| format!("Pipeline validation failed for: {}", file.display()))?;

    let rows = trigger_space(&pipeline.stages)
        .into_iter()
        .map(|facts| {
            let stage = match select(&pipeline.stages, &facts) {
                Ok(stage) => stage.name.clone(),
                Err(SelectionError::NoStage { .. }) => "-".to_string(),
                Err(SelectionError::Ambiguous { stages, .. }) => stages.join(" + "),
            };
            SelectionRow { facts, stage }
        })
        .collect();

    tracing::info!(pipeline = %pipeline.name, stages = pipeline.stage_count(), "Pipeline validation successful");
    Ok((pipeline, rows))
}

/// Renders the selection table
pub fn format_rows(rows: &[SelectionRow]) -> String {
    let mut out = format!("{:<18} {:<20} STAGE\n", "CAUSE", "BRANCH");
    for row in rows {
        let branch = match row.facts.branch.as_str() {
            "" => "(none)",
            UNNAMED_BRANCH => "(any other)",
            other => other,
        };
        let _ = writeln!(out, "{:<18} {:<20} {}", row.facts.cause.to_string(), branch, row.stage);
    }
    out
}
