//! Stage types for pipeline definition
//!
//! This module defines stage types, their `when` predicates and builder pattern.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use super::Validate;
use super::agent::AgentSpec;
use super::environment::Environment;
use super::errors::ValidationError;
use super::steps::Step;
use super::types::{TriggerCause, TriggerFacts};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Branch name that no sensible predicate mentions, used to probe "any other branch"
pub const UNNAMED_BRANCH: &str = "__runline_unnamed_branch__";

/// When conditions for stage execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WhenCondition {
    /// Branch matches a glob pattern (`*`, `?`, `[...]`)
    Branch(String),

    /// Run was started by the given cause
    TriggeredBy(TriggerCause),

    /// Inner condition is false
    Not(Box<WhenCondition>),

    /// All conditions must be true
    AllOf(Vec<WhenCondition>),

    /// At least one condition must be true
    AnyOf(Vec<WhenCondition>),
}

impl WhenCondition {
    /// Creates a branch condition
    pub fn branch(pattern: impl Into<String>) -> Self {
        Self::Branch(pattern.into())
    }

    /// Creates a trigger-cause condition
    pub fn triggered_by(cause: TriggerCause) -> Self {
        Self::TriggeredBy(cause)
    }

    /// Negates a condition
    #[allow(clippy::should_implement_trait)]
    pub fn not(condition: WhenCondition) -> Self {
        Self::Not(Box::new(condition))
    }

    /// Creates an all-of condition
    pub fn all_of(conditions: Vec<WhenCondition>) -> Self {
        Self::AllOf(conditions)
    }

    /// Creates an any-of condition
    pub fn any_of(conditions: Vec<WhenCondition>) -> Self {
        Self::AnyOf(conditions)
    }

    /// Evaluates the predicate against the trigger facts
    pub fn evaluate(&self, facts: &TriggerFacts) -> bool {
        match self {
            Self::Branch(pattern) => glob_match(pattern, &facts.branch),
            Self::TriggeredBy(cause) => facts.cause == *cause,
            Self::Not(inner) => !inner.evaluate(facts),
            Self::AllOf(conditions) => conditions.iter().all(|c| c.evaluate(facts)),
            Self::AnyOf(conditions) => conditions.iter().any(|c| c.evaluate(facts)),
        }
    }

    /// Collects every branch pattern mentioned in this condition
    fn branch_patterns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Branch(pattern) => out.push(pattern),
            Self::TriggeredBy(_) => {}
            Self::Not(inner) => inner.branch_patterns(out),
            Self::AllOf(conditions) | Self::AnyOf(conditions) => {
                for c in conditions {
                    c.branch_patterns(out);
                }
            }
        }
    }
}

impl fmt::Display for WhenCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |conditions: &[WhenCondition]| {
            conditions
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            Self::Branch(pattern) => write!(f, "branch '{pattern}'"),
            Self::TriggeredBy(cause) => write!(f, "triggeredBy '{cause}'"),
            Self::Not(inner) => write!(f, "not {{ {inner} }}"),
            Self::AllOf(conditions) => write!(f, "allOf {{ {} }}", join(conditions)),
            Self::AnyOf(conditions) => write!(f, "anyOf {{ {} }}", join(conditions)),
        }
    }
}

impl Validate for WhenCondition {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        match self {
            Self::Branch(pattern) => {
                if pattern.is_empty() {
                    return Err(ValidationError::InvalidCondition(
                        "Branch pattern cannot be empty".to_string(),
                    ));
                }
                Pattern::new(pattern).map_err(|e| {
                    ValidationError::InvalidCondition(format!(
                        "Invalid branch pattern '{pattern}': {e}"
                    ))
                })?;
            }
            Self::TriggeredBy(_) => {}
            Self::Not(inner) => inner.validate()?,
            Self::AllOf(conditions) | Self::AnyOf(conditions) => {
                if conditions.is_empty() {
                    return Err(ValidationError::InvalidCondition(
                        "allOf/anyOf needs at least one condition".to_string(),
                    ));
                }
                for cond in conditions {
                    cond.validate()?;
                }
            }
        }
        Ok(())
    }
}

/// Glob match over a whole branch name; `*` also crosses `/`.
fn glob_match(pattern: &str, branch: &str) -> bool {
    Pattern::new(pattern).is_ok_and(|p| p.matches(branch))
}

/// A stage in a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name
    pub name: String,

    /// Eligibility predicate, absent means always eligible
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub when: Option<WhenCondition>,

    /// Where the steps run
    #[serde(default)]
    pub agent: AgentSpec,

    /// Stage-level environment declarations
    #[serde(skip_serializing_if = "Environment::is_empty", default)]
    pub environment: Environment,

    /// Steps in this stage
    pub steps: Vec<Step>,
}

impl Validate for Stage {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        if self.name.len() > 100 {
            return Err(ValidationError::NameTooLong {
                max: 100,
                len: self.name.len(),
            });
        }

        if self.steps.is_empty() {
            return Err(ValidationError::EmptyStage {
                stage: self.name.clone(),
            });
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.script.trim().is_empty() {
                return Err(ValidationError::EmptyScript {
                    stage: self.name.clone(),
                    index,
                });
            }
        }

        self.agent.validate()?;
        self.environment.validate()?;

        if let Some(ref when) = self.when {
            when.validate()?;
        }

        Ok(())
    }
}

impl Stage {
    /// Creates a new stage
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            when: None,
            agent: AgentSpec::None,
            environment: Environment::new(),
            steps,
        }
    }

    /// Sets agent for this stage
    pub fn with_agent(mut self, agent: AgentSpec) -> Self {
        self.agent = agent;
        self
    }

    /// Sets when condition for this stage
    pub fn with_when(mut self, when: WhenCondition) -> Self {
        self.when = Some(when);
        self
    }

    /// Sets the stage environment
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Returns true if this stage may run for the given trigger
    pub fn is_eligible(&self, facts: &TriggerFacts) -> bool {
        self.when.as_ref().is_none_or(|w| w.evaluate(facts))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stage({}): {} steps", self.name, self.steps.len())
    }
}

/// Enumerates a finite set of trigger facts covering every distinguishable
/// case for the given stages: each cause crossed with one concrete branch per
/// mentioned pattern, one unmentioned branch, and the empty branch.
pub fn trigger_space(stages: &[Stage]) -> Vec<TriggerFacts> {
    let mut patterns = Vec::new();
    for stage in stages {
        if let Some(ref when) = stage.when {
            when.branch_patterns(&mut patterns);
        }
    }

    let mut branches: Vec<String> = patterns
        .iter()
        .map(|p| p.replace(['*', '?'], "x"))
        .collect();
    branches.push(UNNAMED_BRANCH.to_string());
    branches.push(String::new());
    branches.sort();
    branches.dedup();

    TriggerCause::ALL
        .iter()
        .flat_map(|cause| {
            branches
                .iter()
                .map(move |branch| TriggerFacts::new(*cause, branch.clone()))
        })
        .collect()
}

/// Finds the first pair of stages whose predicates are both true for some
/// trigger in [`trigger_space`].
pub fn find_overlap(stages: &[Stage]) -> Option<ValidationError> {
    for facts in trigger_space(stages) {
        let mut eligible = stages.iter().filter(|s| s.is_eligible(&facts));
        if let (Some(first), Some(second)) = (eligible.next(), eligible.next()) {
            return Some(ValidationError::OverlappingStages {
                first: first.name.clone(),
                second: second.name.clone(),
                cause: facts.cause.to_string(),
                branch: facts.branch,
            });
        }
    }
    None
}

/// Builder for creating stages
pub struct StageBuilder {
    stage: Stage,
}

impl StageBuilder {
    /// Creates a new stage builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            stage: Stage::new(name, Vec::new()),
        }
    }

    /// Sets agent for the stage
    pub fn agent(mut self, agent: AgentSpec) -> Self {
        self.stage.agent = agent;
        self
    }

    /// Sets when condition for the stage
    pub fn when(mut self, when: WhenCondition) -> Self {
        self.stage.when = Some(when);
        self
    }

    /// Sets the stage environment
    pub fn environment(mut self, environment: Environment) -> Self {
        self.stage.environment = environment;
        self
    }

    /// Adds a step to the stage
    pub fn step(mut self, step: Step) -> Self {
        self.stage.steps.push(step);
        self
    }

    /// Builds the stage
    #[allow(clippy::missing_errors_doc)]
    pub fn build(self) -> Result<Stage, ValidationError> {
        self.stage.validate()?;
        Ok(self.stage)
    }

    /// Builds the stage without validation (for internal use)
    #[must_use]
    pub fn build_unchecked(self) -> Stage {
        self.stage
    }
}
