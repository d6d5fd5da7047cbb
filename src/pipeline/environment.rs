//! Environment variable declarations for pipelines and stages.
//!
//! Declarations are kept in order: values may reference earlier entries with
//! `${NAME}`, and a later declaration of the same name overrides an earlier one.

use super::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value filled in from runtime facts when the environment is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedValue {
    /// Fresh per-stage temporary directory assigned by the provisioner
    TempDir,
    /// Workspace directory the steps run in
    Workspace,
    /// Build number of the current run
    BuildNumber,
    /// Active branch
    BranchName,
    /// Name of the selected stage
    StageName,
    /// Number of CPUs available to the controller
    AvailableParallelism,
}

impl fmt::Display for DerivedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TempDir => "temp_dir",
            Self::Workspace => "workspace",
            Self::BuildNumber => "build_number",
            Self::BranchName => "branch_name",
            Self::StageName => "stage_name",
            Self::AvailableParallelism => "available_parallelism",
        };
        write!(f, "{name}")
    }
}

/// Right-hand side of a declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvValue {
    /// Literal value, `${NAME}` references are expanded
    Value(String),
    /// Runtime-derived marker
    Derived(DerivedValue),
}

/// One `NAME = value` declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvDeclaration {
    /// Variable name
    pub name: String,
    /// Declared value
    #[serde(flatten)]
    pub value: EnvValue,
}

/// Ordered environment declarations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Environment(pub Vec<EnvDeclaration>);

impl Environment {
    /// Creates a new empty environment
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a literal variable
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push(EnvDeclaration {
            name: name.into(),
            value: EnvValue::Value(value.into()),
        });
        self
    }

    /// Declares a runtime-derived variable
    #[must_use]
    pub fn derived(mut self, name: impl Into<String>, value: DerivedValue) -> Self {
        self.0.push(EnvDeclaration {
            name: name.into(),
            value: EnvValue::Derived(value),
        });
        self
    }

    /// Iterates over declarations in order
    pub fn iter(&self) -> impl Iterator<Item = &EnvDeclaration> {
        self.0.iter()
    }

    /// Returns the number of declarations
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing is declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl super::Validate for Environment {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        for decl in &self.0 {
            let mut chars = decl.name.chars();
            let valid = chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(ValidationError::InvalidNameChars {
                    name: decl.name.clone(),
                });
            }
        }
        Ok(())
    }
}
