//! Step execution
//!
//! Steps run strictly in order on one agent. The first non-zero exit or
//! executor fault stops the stage; there is no partial success.

use super::log::LogBuffer;
use super::provisioner::AgentContext;
use super::traits::ShellRunner;
use crate::pipeline::Step;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Binary result of running a stage's steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Every step exited with status zero
    Succeeded {
        /// Number of steps run
        steps_run: usize,
    },
    /// Execution stopped at the first failing step
    Failed {
        /// Zero-based index of the failing step
        step_index: usize,
        /// Display name of the failing step
        step: String,
        /// Exit code, absent for executor faults
        exit_code: Option<i32>,
        /// Human-readable reason
        reason: String,
    },
}

impl StepOutcome {
    /// Returns true if every step succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded { steps_run } => write!(f, "{steps_run} steps succeeded"),
            Self::Failed {
                step_index,
                step,
                reason,
                ..
            } => write!(f, "step {} '{step}' failed: {reason}", step_index + 1),
        }
    }
}

/// Runs steps through a shell boundary
#[derive(Clone)]
pub struct StepExecutor {
    shell: Arc<dyn ShellRunner>,
}

impl fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepExecutor").finish_non_exhaustive()
    }
}

impl StepExecutor {
    /// Creates an executor over a shell runner
    #[must_use]
    pub fn new(shell: Arc<dyn ShellRunner>) -> Self {
        Self { shell }
    }

    /// Runs `steps` in order on `agent`
    ///
    /// Each step gets a `+ <step>` header line in `log`, followed by its
    /// output. Dropping the returned future kills the running step.
    pub async fn run(
        &self,
        steps: &[Step],
        agent: &AgentContext,
        env: &BTreeMap<String, String>,
        log: &LogBuffer,
    ) -> StepOutcome {
        for (index, step) in steps.iter().enumerate() {
            log.push(format!("+ {step}"));
            let invocation = agent.invocation(step, env);

            let failure = match self.shell.run(&invocation, log).await {
                Ok(result) if result.is_success() => {
                    tracing::debug!(
                        step = %step,
                        duration_ms = result.duration.as_millis(),
                        "Step succeeded"
                    );
                    continue;
                }
                Ok(result) => (
                    Some(result.exit_code),
                    format!("script returned exit code {}", result.exit_code),
                ),
                Err(err) => (None, err.to_string()),
            };

            let (exit_code, reason) = failure;
            tracing::debug!(step = %step, index, reason = %reason, "Step failed");
            return StepOutcome::Failed {
                step_index: index,
                step: step.to_string(),
                exit_code,
                reason,
            };
        }

        StepOutcome::Succeeded {
            steps_run: steps.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::errors::ShellError;
    use crate::executor::traits::{ShellInvocation, ShellResult};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    /// Exit code is taken from the last script line, `missing` fakes a fault
    #[derive(Default)]
    struct EchoShell {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ShellRunner for EchoShell {
        async fn run(
            &self,
            invocation: &ShellInvocation,
            log: &LogBuffer,
        ) -> Result<ShellResult, ShellError> {
            let body = invocation.script.lines().last().unwrap_or("").to_string();
            self.seen.lock().push(body.clone());
            if body == "missing" {
                return Err(ShellError::InterpreterNotFound {
                    interpreter: invocation.interpreter.clone(),
                });
            }
            log.push(format!("ran {body}"));
            Ok(ShellResult {
                exit_code: body.strip_prefix("exit ").map_or(0, |c| c.parse().unwrap()),
                duration: Duration::ZERO,
            })
        }
    }

    fn agent() -> AgentContext {
        AgentContext::host("/work", "/tmp/agent")
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let shell = Arc::new(EchoShell::default());
        let log = LogBuffer::new();
        let steps = vec![Step::shell("a"), Step::shell("b")];

        let outcome = StepExecutor::new(shell.clone())
            .run(&steps, &agent(), &BTreeMap::new(), &log)
            .await;

        assert_eq!(outcome, StepOutcome::Succeeded { steps_run: 2 });
        assert_eq!(log.lines(), vec!["+ sh(a)", "ran a", "+ sh(b)", "ran b"]);
    }

    #[tokio::test]
    async fn test_first_failure_stops_stage() {
        let shell = Arc::new(EchoShell::default());
        let log = LogBuffer::new();
        let steps = vec![Step::shell("a"), Step::shell("exit 2"), Step::shell("c")];

        let outcome = StepExecutor::new(shell.clone())
            .run(&steps, &agent(), &BTreeMap::new(), &log)
            .await;

        assert_eq!(
            outcome,
            StepOutcome::Failed {
                step_index: 1,
                step: "sh(exit 2)".to_string(),
                exit_code: Some(2),
                reason: "script returned exit code 2".to_string(),
            }
        );
        assert_eq!(*shell.seen.lock(), vec!["a", "exit 2"]);
        assert!(!log.lines().iter().any(|l| l.contains('c')));
    }

    #[tokio::test]
    async fn test_interpreter_fault_is_failure() {
        let shell = Arc::new(EchoShell::default());
        let log = LogBuffer::new();
        let steps = vec![Step::shell("missing").with_name("lint"), Step::shell("b")];

        let outcome = StepExecutor::new(shell)
            .run(&steps, &agent(), &BTreeMap::new(), &log)
            .await;

        match outcome {
            StepOutcome::Failed {
                step_index,
                step,
                exit_code,
                reason,
            } => {
                assert_eq!(step_index, 0);
                assert_eq!(step, "lint");
                assert_eq!(exit_code, None);
                assert!(reason.contains("Interpreter not found"));
            }
            StepOutcome::Succeeded { .. } => panic!("expected failure"),
        }
    }
}
