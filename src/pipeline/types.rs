//! Core types for pipeline domain
//!
//! This module contains fundamental types that represent
//! the lifecycle of a pipeline run.

#![allow(clippy::must_use_candidate)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of what started a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerCause {
    /// Started by the cron schedule
    Timer,
    /// Started by a source-control event (push, branch indexing)
    #[serde(rename = "scm", alias = "source_event")]
    SourceEvent,
    /// Started by a user or an API call
    Manual,
}

impl TriggerCause {
    /// Every cause, in declaration order
    pub const ALL: [Self; 3] = [Self::Timer, Self::SourceEvent, Self::Manual];
}

impl fmt::Display for TriggerCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timer => write!(f, "TimerTrigger"),
            Self::SourceEvent => write!(f, "BranchEventCause"),
            Self::Manual => write!(f, "UserIdCause"),
        }
    }
}

/// What the trigger evaluator learned about the current invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerFacts {
    /// Why the run started
    pub cause: TriggerCause,
    /// Active branch, empty for non-branch triggers
    pub branch: String,
}

impl TriggerFacts {
    /// Creates trigger facts
    pub fn new(cause: TriggerCause, branch: impl Into<String>) -> Self {
        Self {
            cause,
            branch: branch.into(),
        }
    }
}

impl fmt::Display for TriggerFacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.branch.is_empty() {
            write!(f, "{}", self.cause)
        } else {
            write!(f, "{} on {}", self.cause, self.branch)
        }
    }
}

/// Status of a pipeline run
///
/// `Pending → Running → {Succeeded, Failed, TimedOut, Aborted}`. Terminal
/// states have no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Waiting for admission
    #[default]
    Pending,
    /// Holding the running slot
    Running,
    /// Selected stage completed, or nothing to do
    Succeeded,
    /// Step, provisioning or configuration failure
    Failed,
    /// Overall deadline exceeded
    TimedOut,
    /// Cancelled externally
    Aborted,
}

impl RunStatus {
    /// Returns true if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Aborted
        )
    }

    /// Returns true if the run succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true for the statuses that trigger a failure notification
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }

    /// Returns true if `next` is a legal successor of this status
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Aborted),
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Succeeded => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILURE"),
            Self::TimedOut => write!(f, "TIMEOUT"),
            Self::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Trait for types that can be validated
#[allow(clippy::missing_errors_doc)]
pub trait Validate {
    /// Type of validation error
    type Error;

    /// Validates this type
    fn validate(&self) -> std::result::Result<(), Self::Error>;
}
