//! Pipeline run state

use crate::pipeline::{PipelineError, RunStatus, TriggerFacts};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// One execution of a pipeline, owned by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    /// Unique run id
    pub id: Uuid,
    /// Build number
    pub build_number: u64,
    /// Trigger the run was evaluated with
    pub trigger: TriggerFacts,
    /// Creation time
    pub started_at: DateTime<Utc>,
    status: RunStatus,
}

impl PipelineRun {
    /// Creates a pending run
    #[must_use]
    pub fn new(build_number: u64, trigger: TriggerFacts) -> Self {
        Self {
            id: Uuid::new_v4(),
            build_number,
            trigger,
            started_at: Utc::now(),
            status: RunStatus::Pending,
        }
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Moves the run to `next`
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidTransition`] for moves the run state
    /// machine does not allow, including any move out of a terminal status.
    pub fn transition(&mut self, next: RunStatus) -> Result<(), PipelineError> {
        if !self.status.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        tracing::debug!(build = self.build_number, from = %self.status, to = %next, "Run transition");
        self.status = next;
        Ok(())
    }
}

impl fmt::Display for PipelineRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({}) {}", self.build_number, self.trigger, self.status)
    }
}

/// What a finished run reports back to its caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Build number
    pub build_number: u64,
    /// Terminal status
    pub status: RunStatus,
    /// Stage that was selected, if any
    pub stage: Option<String>,
    /// Bounded tail of the console log
    pub log_tail: Vec<String>,
    /// Wall-clock duration of the run
    pub duration: Duration,
    /// Reason for a non-successful status
    pub error: Option<String>,
    /// Whether a failure notification was handed to the notifier
    pub notified: bool,
}

impl RunReport {
    /// Returns true if the run succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Build #{}: {}", self.build_number, self.status)?;
        if let Some(ref stage) = self.stage {
            write!(f, " (stage {stage})")?;
        }
        if let Some(ref error) = self.error {
            write!(f, ": {error}")?;
        }
        Ok(())
    }
}
