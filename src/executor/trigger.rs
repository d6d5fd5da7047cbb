//! Trigger evaluation
//!
//! Turns the raw invocation context reported by the CI server into the
//! normalized `(cause, branch)` facts that stage predicates are evaluated on.

use crate::pipeline::{TriggerCause, TriggerFacts};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Parameter consulted when the invocation carries no explicit branch
pub const BRANCH_PARAMETER: &str = "BRANCH_NAME";

/// One cause record, as reported by the CI server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Cause {
    /// Cron schedule fired
    Timer,
    /// Branch push or other source event
    Scm,
    /// A user started the build
    User {
        /// User id
        #[serde(default)]
        user_id: String,
        /// User e-mail, used by the `requestor` recipient provider
        #[serde(skip_serializing_if = "Option::is_none", default)]
        email: Option<String>,
    },
    /// Another pipeline started this one
    Upstream {
        /// Upstream project
        project: String,
        /// Upstream build number
        build: u64,
    },
}

impl Cause {
    /// Normalized trigger cause
    #[must_use]
    pub fn trigger_cause(&self) -> TriggerCause {
        match self {
            Self::Timer => TriggerCause::Timer,
            Self::Scm => TriggerCause::SourceEvent,
            Self::User { .. } | Self::Upstream { .. } => TriggerCause::Manual,
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timer => write!(f, "Started by timer"),
            Self::Scm => write!(f, "Branch event"),
            Self::User { user_id, .. } => write!(f, "Started by user {user_id}"),
            Self::Upstream { project, build } => {
                write!(f, "Started by upstream project {project} build number {build}")
            }
        }
    }
}

/// One entry of the change set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Commit id
    #[serde(default)]
    pub commit: String,
    /// Author name
    pub author: String,
    /// Author e-mail
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub email: Option<String>,
    /// Commit message
    #[serde(default)]
    pub message: String,
}

impl Change {
    /// Creates a change from an author and message
    #[must_use]
    pub fn new(author: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            commit: String::new(),
            author: author.into(),
            email: None,
            message: message.into(),
        }
    }

    /// Sets the author e-mail
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subject = self.message.lines().next().unwrap_or("");
        if self.commit.is_empty() {
            write!(f, "{}: {subject}", self.author)
        } else {
            let short = self.commit.get(..8).unwrap_or(&self.commit);
            write!(f, "[{short}] {}: {subject}", self.author)
        }
    }
}

/// Everything the CI server tells us about one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InvocationContext {
    /// Project (job) name
    #[serde(default)]
    pub project: String,
    /// Build number assigned by the server, if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub build_number: Option<u64>,
    /// Branch the build runs on
    #[serde(default)]
    pub branch: String,
    /// Cause records, in reported order
    #[serde(default)]
    pub causes: Vec<Cause>,
    /// Change set since the previous build
    #[serde(default)]
    pub changes: Vec<Change>,
    /// User who requested a manual build
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub requested_by: Option<String>,
    /// Build parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl InvocationContext {
    /// Creates an invocation for a project
    #[must_use]
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Self::default()
        }
    }

    /// Sets the branch
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Appends a cause record
    #[must_use]
    pub fn with_cause(mut self, cause: Cause) -> Self {
        self.causes.push(cause);
        self
    }

    /// Appends a change
    #[must_use]
    pub fn with_change(mut self, change: Change) -> Self {
        self.changes.push(change);
        self
    }

    /// Sets the build number
    #[must_use]
    pub fn with_build_number(mut self, number: u64) -> Self {
        self.build_number = Some(number);
        self
    }

    /// Sets the requesting user
    #[must_use]
    pub fn with_requested_by(mut self, user: impl Into<String>) -> Self {
        self.requested_by = Some(user.into());
        self
    }

    /// Sets a build parameter
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Parses an invocation from JSON
    ///
    /// # Errors
    ///
    /// Returns the deserialization error when the document is malformed
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }

    /// Requestor address: the explicit requester, else the first user cause
    #[must_use]
    pub fn requestor(&self) -> Option<String> {
        if let Some(ref user) = self.requested_by {
            return Some(user.clone());
        }
        self.causes.iter().find_map(|cause| match cause {
            Cause::User { email: Some(email), .. } => Some(email.clone()),
            Cause::User { user_id, .. } if !user_id.is_empty() => Some(user_id.clone()),
            _ => None,
        })
    }

    /// Human-readable cause line
    #[must_use]
    pub fn cause_description(&self) -> String {
        match self.causes.first() {
            Some(cause) => cause.to_string(),
            None => "Started manually".to_string(),
        }
    }

    /// One line per change, or a placeholder when the set is empty
    #[must_use]
    pub fn change_summary(&self) -> String {
        if self.changes.is_empty() {
            return "No changes".to_string();
        }
        self.changes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Derives the normalized trigger facts of an invocation
///
/// The first cause record decides the cause; no record means a manual start.
/// An empty branch falls back to the `BRANCH_NAME` parameter.
#[must_use]
pub fn evaluate(context: &InvocationContext) -> TriggerFacts {
    let cause = context
        .causes
        .first()
        .map_or(TriggerCause::Manual, Cause::trigger_cause);

    let branch = if context.branch.is_empty() {
        context
            .parameters
            .get(BRANCH_PARAMETER)
            .cloned()
            .unwrap_or_default()
    } else {
        context.branch.clone()
    };

    TriggerFacts::new(cause, branch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_evaluate_timer_on_main() {
        let ctx = InvocationContext::new("plenoptic")
            .with_branch("main")
            .with_cause(Cause::Timer);
        assert_eq!(evaluate(&ctx), TriggerFacts::new(TriggerCause::Timer, "main"));
    }

    #[test]
    fn test_evaluate_first_cause_wins() {
        let ctx = InvocationContext::new("p")
            .with_branch("dev")
            .with_cause(Cause::Scm)
            .with_cause(Cause::Timer);
        assert_eq!(evaluate(&ctx).cause, TriggerCause::SourceEvent);
    }

    #[test]
    fn test_evaluate_defaults_to_manual() {
        let ctx = InvocationContext::new("p");
        assert_eq!(evaluate(&ctx), TriggerFacts::new(TriggerCause::Manual, ""));

        let upstream = ctx.with_cause(Cause::Upstream {
            project: "core".to_string(),
            build: 9,
        });
        assert_eq!(evaluate(&upstream).cause, TriggerCause::Manual);
    }

    #[test]
    fn test_evaluate_branch_parameter_fallback() {
        let ctx = InvocationContext::new("p")
            .with_cause(Cause::Scm)
            .with_parameter(BRANCH_PARAMETER, "feature-x");
        assert_eq!(evaluate(&ctx).branch, "feature-x");

        let explicit = ctx.with_branch("main");
        assert_eq!(evaluate(&explicit).branch, "main");
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let ctx = InvocationContext::new("p").with_branch("main").with_cause(Cause::Scm);
        assert_eq!(evaluate(&ctx), evaluate(&ctx.clone()));
    }

    #[test]
    fn test_invocation_from_json() {
        let json = r#"{
            "project": "plenoptic",
            "build_number": 42,
            "branch": "main",
            "causes": [{"type": "user", "user_id": "alice", "email": "alice@example.org"}],
            "changes": [{"commit": "0123456789ab", "author": "bob", "message": "Fix solver\n\nbody"}]
        }"#;
        let ctx = InvocationContext::from_json(json).unwrap();
        assert_eq!(ctx.build_number, Some(42));
        assert_eq!(evaluate(&ctx).cause, TriggerCause::Manual);
        assert_eq!(ctx.requestor().as_deref(), Some("alice@example.org"));
        assert_eq!(ctx.change_summary(), "[01234567] bob: Fix solver");
        assert_eq!(ctx.cause_description(), "Started by user alice");
    }

    #[test]
    fn test_requested_by_overrides_user_cause() {
        let ctx = InvocationContext::new("p")
            .with_cause(Cause::User {
                user_id: "alice".to_string(),
                email: None,
            })
            .with_requested_by("ops@example.org");
        assert_eq!(ctx.requestor().as_deref(), Some("ops@example.org"));
        assert_eq!(InvocationContext::new("p").change_summary(), "No changes");
    }
}
