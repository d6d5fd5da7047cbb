//! Pipeline definition and builder

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use crate::pipeline::environment::Environment;
use crate::pipeline::errors::{PipelineError, ValidationError};
use crate::pipeline::options::{PipelineOptions, Trigger};
use crate::pipeline::post::{EmailNotification, Post};
use crate::pipeline::stage::{Stage, find_overlap};
use crate::pipeline::types::Validate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Deserializes definition YAML, where enum variants are written as
/// single-key maps (`agent: {dockerfile: ...}`) or plain names (`agent: none`)
pub(crate) fn parse_yaml<T: DeserializeOwned>(source: &str) -> Result<T, serde_yaml::Error> {
    serde_yaml::with::singleton_map_recursive::deserialize(serde_yaml::Deserializer::from_str(
        source,
    ))
}

/// Declarative pipeline definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline name, used as the project name in notifications
    pub name: String,

    /// Pipeline triggers
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub triggers: Vec<Trigger>,

    /// Pipeline options
    #[serde(default)]
    pub options: PipelineOptions,

    /// Pipeline-level environment, overridden by stage declarations
    #[serde(skip_serializing_if = "Environment::is_empty", default)]
    pub environment: Environment,

    /// Candidate stages; at most one runs per build
    pub stages: Vec<Stage>,

    /// Post-build actions
    #[serde(default)]
    pub post: Post,
}

impl Validate for Pipeline {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        if self.stages.is_empty() {
            return Err(ValidationError::EmptyPipeline);
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            stage.validate()?;
            if !seen.insert(stage.name.as_str()) {
                return Err(ValidationError::DuplicateStage(stage.name.clone()));
            }
        }

        for trigger in &self.triggers {
            trigger.validate()?;
        }

        self.options.validate()?;
        self.environment.validate()?;

        if let Some(email) = self.post.email() {
            email.validate()?;
        }

        if let Some(overlap) = find_overlap(&self.stages) {
            return Err(overlap);
        }

        Ok(())
    }
}

impl Pipeline {
    /// Creates a new pipeline builder
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    /// Parses and validates a YAML definition
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Parse`] for malformed YAML and
    /// [`PipelineError::Validation`] for an invalid definition.
    pub fn from_yaml(source: &str) -> Result<Self, PipelineError> {
        let pipeline: Self = parse_yaml(source)?;
        pipeline.validate()?;
        Ok(pipeline)
    }

    /// Reads, parses and validates a YAML definition file
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the file cannot be read, otherwise as
    /// [`Pipeline::from_yaml`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml(&source)
    }

    /// Returns number of stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Finds a stage by name
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pipeline({}): {} stages", self.name, self.stages.len())
    }
}

/// Builder for creating pipelines
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    pipeline: Pipeline,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            pipeline: Pipeline {
                name: name.into(),
                triggers: Vec::new(),
                options: PipelineOptions::default(),
                environment: Environment::new(),
                stages: Vec::new(),
                post: Post::default(),
            },
        }
    }

    /// Adds a stage to pipeline
    pub fn stage(mut self, stage: Stage) -> Self {
        self.pipeline.stages.push(stage);
        self
    }

    /// Configures environment with a closure
    pub fn environment<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Environment) -> Environment,
    {
        self.pipeline.environment = f(self.pipeline.environment);
        self
    }

    /// Adds a trigger to pipeline
    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.pipeline.triggers.push(trigger);
        self
    }

    /// Sets pipeline options
    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.pipeline.options = options;
        self
    }

    /// Sets the failure e-mail
    pub fn on_failure_email(mut self, email: EmailNotification) -> Self {
        self.pipeline.post = Post::failure_email(email);
        self
    }

    /// Builds pipeline
    #[allow(clippy::missing_errors_doc)]
    pub fn build(self) -> Result<Pipeline, ValidationError> {
        self.pipeline.validate()?;
        Ok(self.pipeline)
    }

    /// Builds pipeline without validation (for internal use)
    #[must_use]
    pub fn build_unchecked(self) -> Pipeline {
        self.pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{
        AgentSpec, DerivedValue, RecipientProvider, Step, TriggerCause, WhenCondition,
    };

    const SAMPLE: &str = include_str!("../../demos/pipeline.yaml");

    #[test]
    fn test_sample_definition_parses() {
        let pipeline = Pipeline::from_yaml(SAMPLE).unwrap();

        assert_eq!(pipeline.stage_count(), 2);
        assert!(pipeline.options.disable_concurrent_builds);
        assert!(pipeline.options.timeout.is_some());
        assert_eq!(pipeline.triggers.len(), 1);

        let weekly = pipeline.stage("weekly").unwrap();
        assert!(matches!(weekly.agent, AgentSpec::Dockerfile(_)));
        assert!(
            weekly
                .environment
                .iter()
                .any(|d| d.value == crate::pipeline::EnvValue::Derived(DerivedValue::TempDir))
        );

        let email = pipeline.post.email().unwrap();
        assert!(email.recipients.contains(&RecipientProvider::Culprits));
    }

    #[test]
    fn test_builder_rejects_empty_pipeline() {
        assert!(matches!(
            Pipeline::builder("p").build(),
            Err(ValidationError::EmptyPipeline)
        ));
    }

    #[test]
    fn test_builder_rejects_duplicate_stage() {
        let result = Pipeline::builder("p")
            .stage(
                Stage::new("a", vec![Step::shell("x")])
                    .with_when(WhenCondition::triggered_by(TriggerCause::Timer)),
            )
            .stage(
                Stage::new("a", vec![Step::shell("y")])
                    .with_when(WhenCondition::triggered_by(TriggerCause::Manual)),
            )
            .build();
        assert_eq!(result, Err(ValidationError::DuplicateStage("a".to_string())));
    }

    #[test]
    fn test_builder_rejects_overlapping_stages() {
        let result = Pipeline::builder("p")
            .stage(Stage::new("a", vec![Step::shell("x")]))
            .stage(
                Stage::new("b", vec![Step::shell("y")])
                    .with_when(WhenCondition::triggered_by(TriggerCause::Manual)),
            )
            .build();
        assert!(matches!(
            result,
            Err(ValidationError::OverlappingStages { .. })
        ));
    }

    #[test]
    fn test_from_yaml_accepts_variant_maps() {
        let source = r"
name: demo
triggers:
  - cron:
      expression: H 2 * * *
  - pollscm:
      interval: 5
  - manual
stages:
  - name: build
    agent:
      docker:
        image: python:3.11
    when:
      anyOf:
        - branch: release/*
        - not:
            triggeredBy: scm
    steps:
      - sh: make
post:
  failure:
    email:
      recipients:
        - static: [dev@example.org]
        - requestor
";
        let pipeline = Pipeline::from_yaml(source).unwrap();

        assert_eq!(
            pipeline.triggers,
            vec![Trigger::cron("H 2 * * *"), Trigger::poll_scm(5), Trigger::Manual]
        );
        let stage = pipeline.stage("build").unwrap();
        assert_eq!(stage.agent, AgentSpec::docker("python:3.11"));
        assert_eq!(
            stage.when,
            Some(WhenCondition::any_of(vec![
                WhenCondition::branch("release/*"),
                WhenCondition::not(WhenCondition::triggered_by(TriggerCause::SourceEvent)),
            ]))
        );
        assert_eq!(
            pipeline.post.email().unwrap().recipients,
            vec![
                RecipientProvider::Static(vec!["dev@example.org".to_string()]),
                RecipientProvider::Requestor,
            ]
        );
    }

    #[test]
    fn test_from_yaml_parse_error() {
        assert!(matches!(
            Pipeline::from_yaml("name: [unclosed"),
            Err(PipelineError::Parse(_))
        ));
    }

    #[test]
    fn test_display() {
        let pipeline = Pipeline::builder("plenoptic")
            .stage(Stage::new("commit", vec![Step::shell("pytest")]))
            .build()
            .unwrap();
        assert_eq!(pipeline.to_string(), "Pipeline(plenoptic): 1 stages");
    }
}
