//! Post-build actions
//!
//! Actions attached to the terminal status of a run. Only the failure hook
//! exists: it fires for `Failed` and `TimedOut` runs.

#![allow(clippy::must_use_candidate)]

use super::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of log lines included for `${BUILD_LOG}`
pub const DEFAULT_LOG_LINES: usize = 100;

/// Where notification recipients come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientProvider {
    /// Fixed addresses
    Static(Vec<String>),
    /// Authors of the changes in this build
    Culprits,
    /// Everyone who contributed a change, across the whole change set
    Developers,
    /// User who started a manual build
    Requestor,
}

impl fmt::Display for RecipientProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(list) => write!(f, "static({})", list.join(", ")),
            Self::Culprits => write!(f, "culprits()"),
            Self::Developers => write!(f, "developers()"),
            Self::Requestor => write!(f, "requestor()"),
        }
    }
}

/// Failure e-mail, rendered from `$NAME` / `${NAME}` templates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailNotification {
    /// Subject template
    #[serde(default = "default_subject")]
    pub subject: String,

    /// Body template
    #[serde(default = "default_body")]
    pub body: String,

    /// Recipient providers, resolved in order and de-duplicated
    #[serde(default)]
    pub recipients: Vec<RecipientProvider>,

    /// Reply-To address
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reply_to: Option<String>,

    /// Log tail length for `${BUILD_LOG}` without `maxLines`
    #[serde(default = "default_log_lines")]
    pub log_lines: usize,
}

fn default_subject() -> String {
    "$PROJECT_NAME - Build # $BUILD_NUMBER - $BUILD_STATUS!".to_string()
}

fn default_body() -> String {
    "$PROJECT_NAME - Build # $BUILD_NUMBER - $BUILD_STATUS\n\n\
     Branch: $BRANCH_NAME\nCause: $CAUSE\n\nChanges:\n$CHANGES\n\n\
     Log tail:\n${BUILD_LOG}\n"
        .to_string()
}

fn default_log_lines() -> usize {
    DEFAULT_LOG_LINES
}

impl Default for EmailNotification {
    fn default() -> Self {
        Self {
            subject: default_subject(),
            body: default_body(),
            recipients: Vec::new(),
            reply_to: None,
            log_lines: DEFAULT_LOG_LINES,
        }
    }
}

impl EmailNotification {
    /// Creates a notification with default templates
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a recipient provider
    #[must_use]
    pub fn recipient(mut self, provider: RecipientProvider) -> Self {
        self.recipients.push(provider);
        self
    }

    /// Sets the Reply-To address
    #[must_use]
    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    /// Sets the subject template
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Sets the body template
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the default log tail length
    #[must_use]
    pub fn log_lines(mut self, lines: usize) -> Self {
        self.log_lines = lines;
        self
    }
}

impl super::Validate for EmailNotification {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.recipients.is_empty() {
            return Err(ValidationError::InvalidNotification(
                "at least one recipient provider is required".to_string(),
            ));
        }
        let addresses = self
            .recipients
            .iter()
            .filter_map(|p| match p {
                RecipientProvider::Static(list) => Some(list.iter()),
                _ => None,
            })
            .flatten()
            .chain(self.reply_to.iter());
        for address in addresses {
            if !address.contains('@') {
                return Err(ValidationError::InvalidNotification(format!(
                    "'{address}' is not an e-mail address"
                )));
            }
        }
        Ok(())
    }
}

/// Actions run when a build ends in `Failed` or `TimedOut`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FailureActions {
    /// Failure e-mail
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub email: Option<EmailNotification>,
}

/// Post-build section of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Post {
    /// Failure hook
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failure: Option<FailureActions>,
}

impl Post {
    /// Post section with a failure e-mail
    pub fn failure_email(email: EmailNotification) -> Self {
        Self {
            failure: Some(FailureActions { email: Some(email) }),
        }
    }

    /// The failure e-mail, if configured
    pub fn email(&self) -> Option<&EmailNotification> {
        self.failure.as_ref().and_then(|f| f.email.as_ref())
    }
}
