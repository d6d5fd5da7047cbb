//! Pipeline options and triggers
//!
//! This module defines configuration options and trigger types for pipelines.

use super::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Triggers for pipeline execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Cron schedule trigger
    #[serde(rename = "cron")]
    CronSchedule {
        /// Cron expression
        expression: String,
        /// Timezone
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timezone: Option<String>,
    },

    /// Poll SCM trigger
    #[serde(rename = "pollscm")]
    PollScm {
        /// Polling interval in minutes
        interval: u64,
    },

    /// Manual trigger
    Manual,
}

impl Trigger {
    /// Creates a cron trigger
    pub fn cron(expression: impl Into<String>) -> Self {
        Self::CronSchedule {
            expression: expression.into(),
            timezone: None,
        }
    }

    /// Creates a poll SCM trigger
    #[must_use]
    pub fn poll_scm(interval_minutes: u64) -> Self {
        Self::PollScm {
            interval: interval_minutes,
        }
    }

    /// Creates a manual trigger
    #[must_use]
    pub fn manual() -> Self {
        Self::Manual
    }
}

/// Checks one cron field: `*`, `H`, numbers, ranges, lists and steps.
fn valid_cron_field(field: &str) -> bool {
    field.split(',').all(|part| {
        let (base, step) = match part.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (part, None),
        };
        if let Some(step) = step
            && step.parse::<u32>().map_or(true, |s| s == 0)
        {
            return false;
        }
        let base = base.strip_prefix('H').map_or(base, |rest| {
            // `H(0-7)` hashed range
            rest.trim_start_matches('(').trim_end_matches(')')
        });
        if base.is_empty() || base == "*" {
            return true;
        }
        match base.split_once('-') {
            Some((lo, hi)) => lo.parse::<u32>().is_ok() && hi.parse::<u32>().is_ok(),
            None => base.parse::<u32>().is_ok(),
        }
    })
}

impl super::Validate for Trigger {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        match self {
            Self::CronSchedule { expression, .. } => {
                if expression.trim().is_empty() {
                    return Err(ValidationError::InvalidCronExpression(
                        "Cron expression cannot be empty".to_string(),
                    ));
                }
                // Jenkins style: 5 whitespace separated fields, one schedule per line
                for line in expression.lines().filter(|l| !l.trim().is_empty()) {
                    let parts: Vec<&str> = line.split_whitespace().collect();
                    if parts.len() != 5 || !parts.iter().all(|p| valid_cron_field(p)) {
                        return Err(ValidationError::InvalidCronExpression(line.to_string()));
                    }
                }
                Ok(())
            }
            Self::PollScm { interval } => {
                if *interval == 0 {
                    return Err(ValidationError::InvalidCronExpression(
                        "Poll interval must be positive".to_string(),
                    ));
                }
                Ok(())
            }
            Self::Manual => Ok(()),
        }
    }
}

/// Unit of a pipeline timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeUnit {
    /// Seconds
    Seconds,
    /// Minutes
    #[default]
    Minutes,
    /// Hours
    Hours,
}

impl TimeUnit {
    /// Length of one unit in seconds
    #[must_use]
    pub fn seconds(self) -> u64 {
        match self {
            Self::Seconds => 1,
            Self::Minutes => 60,
            Self::Hours => 3600,
        }
    }
}

/// Overall wall-clock limit for a run, measured from entering `Running`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeout {
    /// Amount of `unit`
    pub time: u64,
    /// Unit of `time`
    #[serde(default)]
    pub unit: TimeUnit,
}

impl Timeout {
    /// Creates a timeout
    #[must_use]
    pub fn new(time: u64, unit: TimeUnit) -> Self {
        Self { time, unit }
    }

    /// Total seconds, `None` if it does not fit in a `u64`
    #[must_use]
    pub fn as_secs(&self) -> Option<u64> {
        self.time.checked_mul(self.unit.seconds())
    }

    /// Returns the timeout as a duration, saturating at `u64::MAX` seconds
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.as_secs().unwrap_or(u64::MAX))
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self::new(duration.as_secs(), TimeUnit::Seconds)
    }
}

/// What happens to a run started while another holds the running slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyPolicy {
    /// Wait for the running build to finish
    #[default]
    Queue,
    /// Fail fast with `ConcurrentRunRejected`
    Reject,
}

/// Pipeline configuration options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PipelineOptions {
    /// Global timeout for the entire pipeline
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timeout: Option<Timeout>,

    /// Build discarder configuration
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub build_discarder: Option<BuildDiscarder>,

    /// Allow at most one running build of this pipeline
    #[serde(default)]
    pub disable_concurrent_builds: bool,

    /// Queue or reject when concurrent builds are disabled
    #[serde(default)]
    pub concurrency_policy: ConcurrencyPolicy,
}

/// Build discarder configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BuildDiscarder {
    /// Number of builds to keep
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub num_to_keep: Option<usize>,

    /// Number of days to keep builds
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub days_to_keep: Option<u32>,
}

impl BuildDiscarder {
    /// Creates new build discarder
    #[must_use]
    pub fn new(num_to_keep: usize) -> Self {
        Self {
            num_to_keep: Some(num_to_keep),
            days_to_keep: None,
        }
    }

    /// Sets days to keep
    #[must_use]
    #[allow(clippy::return_self_not_must_use)]
    pub fn with_days_to_keep(mut self, days: u32) -> Self {
        self.days_to_keep = Some(days);
        self
    }
}

impl super::Validate for PipelineOptions {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if let Some(timeout) = self.timeout
            && (timeout.time == 0 || timeout.as_secs().is_none())
        {
            return Err(ValidationError::InvalidTimeout {
                value: timeout.time,
            });
        }

        if let Some(discarder) = self.build_discarder {
            if discarder.num_to_keep == Some(0) {
                return Err(ValidationError::InvalidBuildDiscarder(
                    "num_to_keep must be positive".to_string(),
                ));
            }
            if discarder.days_to_keep == Some(0) {
                return Err(ValidationError::InvalidBuildDiscarder(
                    "days_to_keep must be positive".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl PipelineOptions {
    /// Creates new pipeline options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets global timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    /// Sets build discarder
    #[must_use]
    pub fn with_build_discarder(mut self, discarder: BuildDiscarder) -> Self {
        self.build_discarder = Some(discarder);
        self
    }

    /// Disables concurrent builds with the given policy
    #[must_use]
    pub fn with_disable_concurrent_builds(mut self, policy: ConcurrencyPolicy) -> Self {
        self.disable_concurrent_builds = true;
        self.concurrency_policy = policy;
        self
    }

    /// Returns the overall timeout as a duration, if configured
    #[must_use]
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(|t| t.as_duration())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Validate;

    #[test]
    fn test_trigger_cron() {
        let trigger = Trigger::cron("H H * * 0");
        assert!(matches!(trigger, Trigger::CronSchedule { .. }));
        assert!(trigger.validate().is_ok());
    }

    #[test]
    fn test_trigger_cron_hashed_range_and_step() {
        assert!(Trigger::cron("H/15 H(0-7) * * 1-5").validate().is_ok());
    }

    #[test]
    fn test_trigger_cron_invalid() {
        assert!(Trigger::cron("").validate().is_err());
        assert!(Trigger::cron("* * *").validate().is_err());
        assert!(Trigger::cron("*/0 * * * *").validate().is_err());
        assert!(Trigger::cron("a * * * *").validate().is_err());
    }

    #[test]
    fn test_trigger_poll_scm() {
        let trigger = Trigger::poll_scm(15);
        assert!(matches!(trigger, Trigger::PollScm { interval: 15 }));
        assert!(trigger.validate().is_ok());
        assert!(Trigger::poll_scm(0).validate().is_err());
    }

    #[test]
    fn test_trigger_manual() {
        assert!(Trigger::manual().validate().is_ok());
    }

    #[test]
    fn test_pipeline_options_default() {
        let options = PipelineOptions::default();
        assert!(options.timeout.is_none());
        assert!(options.build_discarder.is_none());
        assert!(!options.disable_concurrent_builds);
        assert_eq!(options.concurrency_policy, ConcurrencyPolicy::Queue);
    }

    #[test]
    fn test_timeout_units() {
        assert_eq!(
            Timeout::new(1, TimeUnit::Hours).as_duration(),
            Duration::from_secs(3600)
        );
        assert_eq!(
            Timeout::new(2, TimeUnit::Minutes).as_duration(),
            Duration::from_secs(120)
        );
        let options = PipelineOptions::new().with_timeout(Duration::from_secs(90));
        assert_eq!(options.timeout_duration(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_pipeline_options_invalid_timeout() {
        let options = PipelineOptions::new().with_timeout(Duration::from_secs(0));
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_timeout_overflow() {
        let huge = Timeout::new(u64::MAX / 2, TimeUnit::Hours);
        assert_eq!(huge.as_secs(), None);
        assert_eq!(huge.as_duration(), Duration::from_secs(u64::MAX));
        assert_eq!(
            PipelineOptions::new().with_timeout(huge).validate(),
            Err(ValidationError::InvalidTimeout { value: u64::MAX / 2 })
        );

        let long = Timeout::new(u64::MAX / 2, TimeUnit::Seconds);
        assert_eq!(long.as_secs(), Some(u64::MAX / 2));
        assert!(PipelineOptions::new().with_timeout(long).validate().is_ok());
    }

    #[test]
    fn test_build_discarder() {
        let discarder = BuildDiscarder::new(8).with_days_to_keep(20);
        assert_eq!(discarder.num_to_keep, Some(8));
        assert_eq!(discarder.days_to_keep, Some(20));

        let options = PipelineOptions::new().with_build_discarder(BuildDiscarder::new(0));
        assert!(matches!(
            options.validate(),
            Err(ValidationError::InvalidBuildDiscarder(_))
        ));
    }
}
