//! Configuration management
//!
//! Settings come from an optional YAML file, then `RUNLINE_*` environment
//! variables override individual fields.

use super::container::{ContainerEngine, DockerCli};
use super::mail::{LogTransport, MailTransportKind, SendmailTransport};
use crate::executor::MailTransport;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "RUNLINE_";

/// Errors raised while loading configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {path}: {message}")]
    Read {
        /// File path.
        path: String,
        /// Underlying error.
        message: String,
    },

    /// Config file is not valid YAML for [`Config`]
    #[error("Invalid config file: {0}")]
    Parse(String),

    /// Environment override has an unusable value
    #[error("Invalid value '{value}' for {name}")]
    InvalidEnv {
        /// Variable name.
        name: String,
        /// Rejected value.
        value: String,
    },
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level
    pub log_level: String,
    /// Workspace directory steps run in
    pub workspace: PathBuf,
    /// Container engine for container agents
    pub container_runtime: ContainerEngine,
    /// Notification transport
    pub mail_transport: MailTransportKind,
    /// Sendmail binary for the sendmail transport
    pub sendmail_path: PathBuf,
    /// Sender address of notifications
    pub from_address: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            workspace: PathBuf::from("."),
            container_runtime: ContainerEngine::Docker,
            mail_transport: MailTransportKind::Log,
            sendmail_path: PathBuf::from("/usr/sbin/sendmail"),
            from_address: None,
        }
    }
}

impl Config {
    /// Loads the config file (if any) and applies process environment overrides
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed, or an
    /// override is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Reads a YAML config file
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&source)
    }

    /// Parses YAML config
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed documents.
    pub fn from_yaml(source: &str) -> Result<Self, ConfigError> {
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Applies `RUNLINE_*` overrides read through `lookup`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unknown runtime or transport names.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let name = format!("{ENV_PREFIX}{suffix}");
            lookup(&name).map(|value| (name, value))
        };

        if let Some((_, level)) = var("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some((_, workspace)) = var("WORKSPACE") {
            self.workspace = PathBuf::from(workspace);
        }
        if let Some((name, value)) = var("CONTAINER_RUNTIME") {
            self.container_runtime = value
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { name, value })?;
        }
        if let Some((name, value)) = var("MAIL_TRANSPORT") {
            self.mail_transport = match value.to_ascii_lowercase().as_str() {
                "log" => MailTransportKind::Log,
                "sendmail" => MailTransportKind::Sendmail,
                _ => return Err(ConfigError::InvalidEnv { name, value }),
            };
        }
        if let Some((_, path)) = var("SENDMAIL_PATH") {
            self.sendmail_path = PathBuf::from(path);
        }
        if let Some((_, from)) = var("FROM_ADDRESS") {
            self.from_address = (!from.is_empty()).then_some(from);
        }
        Ok(())
    }

    /// Container runtime for the configured engine
    #[must_use]
    pub fn container_runtime(&self) -> Arc<DockerCli> {
        Arc::new(DockerCli::new(self.container_runtime))
    }

    /// Mail transport for the configured kind
    #[must_use]
    pub fn mail_transport(&self) -> Arc<dyn MailTransport> {
        match self.mail_transport {
            MailTransportKind::Log => Arc::new(LogTransport),
            MailTransportKind::Sendmail => Arc::new(SendmailTransport::new(&self.sendmail_path)),
        }
    }
}
