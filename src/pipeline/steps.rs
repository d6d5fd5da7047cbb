//! Step types for pipeline execution
//!
//! A step is one shell-level action plus the interpreter it requires.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Interpreter used when a script has no shebang, matching Jenkins `sh`
pub const DEFAULT_INTERPRETER: &str = "/bin/sh -xe";

/// A single step in a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Script text
    #[serde(alias = "sh")]
    pub script: String,

    /// Interpreter command line, used when the script has no shebang
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub interpreter: Option<String>,

    /// Optional name for the step
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
}

impl Step {
    /// Creates a shell step run by the default interpreter
    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            interpreter: None,
            name: None,
        }
    }

    /// Sets the interpreter
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Sets the name of the step
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Shebang line the script is executed with.
    ///
    /// An explicit `#!` first line wins over `interpreter`, which wins over
    /// [`DEFAULT_INTERPRETER`].
    pub fn shebang(&self) -> String {
        if let Some(first) = self.script.lines().next()
            && let Some(line) = first.strip_prefix("#!")
        {
            return line.trim().to_string();
        }
        self.interpreter
            .clone()
            .unwrap_or_else(|| DEFAULT_INTERPRETER.to_string())
    }

    /// Script body with a shebang line prepended when it has none
    pub fn script_with_shebang(&self) -> String {
        if self.script.starts_with("#!") {
            self.script.clone()
        } else {
            format!("#!{}\n{}", self.shebang(), self.script)
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}"),
            None => {
                let first = self.script.lines().find(|l| !l.starts_with("#!")).unwrap_or("");
                write!(f, "sh({})", first.trim())
            }
        }
    }
}
