//! Agent configuration types
//!
//! This module defines where a stage's steps run.

use super::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Agent built from a Dockerfile recipe directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerfileConfig {
    /// Recipe directory, relative to the workspace
    pub dir: PathBuf,

    /// Dockerfile name inside `dir`
    #[serde(default = "default_filename")]
    pub filename: String,

    /// Extra arguments for the image build
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub additional_build_args: String,

    /// Resource arguments for the container (e.g. `--gpus all`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub args: String,
}

fn default_filename() -> String {
    "Dockerfile".to_string()
}

impl DockerfileConfig {
    /// Creates a Dockerfile agent for the given recipe directory
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            filename: default_filename(),
            additional_build_args: String::new(),
            args: String::new(),
        }
    }

    /// Sets the container resource arguments
    #[must_use]
    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        self.args = args.into();
        self
    }
}

impl super::Validate for DockerfileConfig {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.dir.as_os_str().is_empty() {
            return Err(ValidationError::InvalidAgentType(
                "Dockerfile recipe directory cannot be empty".to_string(),
            ));
        }
        if self.filename.is_empty() {
            return Err(ValidationError::InvalidAgentType(
                "Dockerfile name cannot be empty".to_string(),
            ));
        }
        validate_args(&self.args)?;
        validate_args(&self.additional_build_args)
    }
}

/// Agent running a prebuilt image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DockerConfig {
    /// Docker image to use
    pub image: String,

    /// Resource arguments for the container
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub args: String,
}

impl super::Validate for DockerConfig {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.image.is_empty() {
            return Err(ValidationError::InvalidAgentType(
                "Docker image cannot be empty".to_string(),
            ));
        }
        validate_args(&self.args)
    }
}

fn validate_args(args: &str) -> Result<(), ValidationError> {
    shell_words::split(args)
        .map(|_| ())
        .map_err(|e| ValidationError::InvalidAgentType(format!("Unparseable args '{args}': {e}")))
}

/// Where a stage runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentSpec {
    /// Run directly on the controller host
    #[default]
    None,

    /// Build an image from a recipe directory and run in it
    Dockerfile(DockerfileConfig),

    /// Run in a prebuilt image
    Docker(DockerConfig),
}

impl AgentSpec {
    /// Creates a Dockerfile agent
    #[must_use]
    pub fn dockerfile(dir: impl Into<PathBuf>) -> Self {
        Self::Dockerfile(DockerfileConfig::new(dir))
    }

    /// Creates a Docker agent
    #[must_use]
    pub fn docker(image: impl Into<String>) -> Self {
        Self::Docker(DockerConfig {
            image: image.into(),
            args: String::new(),
        })
    }

    /// Returns true if steps run inside a container
    #[must_use]
    pub fn is_container(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Parsed container resource arguments
    #[must_use]
    pub fn run_args(&self) -> Vec<String> {
        let raw = match self {
            Self::None => return Vec::new(),
            Self::Dockerfile(config) => &config.args,
            Self::Docker(config) => &config.args,
        };
        shell_words::split(raw).unwrap_or_default()
    }
}

impl fmt::Display for AgentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Dockerfile(config) => write!(f, "dockerfile:{}", config.dir.display()),
            Self::Docker(config) => write!(f, "docker:{}", config.image),
        }
    }
}

impl super::Validate for AgentSpec {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        match self {
            Self::None => Ok(()),
            Self::Dockerfile(config) => config.validate(),
            Self::Docker(config) => config.validate(),
        }
    }
}
