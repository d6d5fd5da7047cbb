//! Environment builder
//!
//! Resolves ordered declarations into the concrete variable map handed to
//! every step of a stage.

use super::shell::expand_variables;
use crate::pipeline::{DerivedValue, EnvDeclaration, EnvValue};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Runtime facts derived markers are filled from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuntimeFacts {
    /// Per-stage temporary directory owned by the agent
    pub temp_dir: PathBuf,
    /// Workspace directory
    pub workspace: PathBuf,
    /// Build number of the run
    pub build_number: u64,
    /// Active branch
    pub branch: String,
    /// Selected stage
    pub stage_name: String,
}

impl RuntimeFacts {
    fn resolve(&self, value: DerivedValue) -> String {
        match value {
            DerivedValue::TempDir => self.temp_dir.display().to_string(),
            DerivedValue::Workspace => self.workspace.display().to_string(),
            DerivedValue::BuildNumber => self.build_number.to_string(),
            DerivedValue::BranchName => self.branch.clone(),
            DerivedValue::StageName => self.stage_name.clone(),
            DerivedValue::AvailableParallelism => std::thread::available_parallelism()
                .map_or(1, std::num::NonZeroUsize::get)
                .to_string(),
        }
    }

    /// Variables every step sees before any declaration is applied
    #[must_use]
    pub fn base_variables(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("WORKSPACE".to_string(), self.resolve(DerivedValue::Workspace)),
            ("WORKSPACE_TMP".to_string(), self.resolve(DerivedValue::TempDir)),
            ("BUILD_NUMBER".to_string(), self.resolve(DerivedValue::BuildNumber)),
            ("BRANCH_NAME".to_string(), self.resolve(DerivedValue::BranchName)),
            ("STAGE_NAME".to_string(), self.resolve(DerivedValue::StageName)),
        ])
    }
}

/// Builds the environment of a stage
///
/// Declarations are applied in order on top of
/// [`RuntimeFacts::base_variables`]. Literal values may reference anything
/// defined so far with `${NAME}`; the last declaration of a name wins.
pub fn build<'a, I>(declarations: I, facts: &RuntimeFacts) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = &'a EnvDeclaration>,
{
    let mut env = facts.base_variables();

    for decl in declarations {
        let value = match &decl.value {
            EnvValue::Value(raw) => expand_variables(raw, &env),
            EnvValue::Derived(marker) => facts.resolve(*marker),
        };
        if let Some(previous) = env.insert(decl.name.clone(), value) {
            tracing::debug!(
                name = %decl.name,
                previous = %previous,
                "Environment variable overridden"
            );
        }
    }

    env
}
