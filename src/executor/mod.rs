//! Pipeline execution layer
//!
//! Everything that happens once an invocation arrives: trigger evaluation,
//! stage selection, agent provisioning, environment construction, step
//! execution, notification and history. External capabilities are reached
//! through the traits in [`traits`].

pub mod controller;
pub mod environment;
pub mod errors;
pub mod gate;
pub mod history;
pub mod log;
pub mod notifier;
pub mod provisioner;
pub mod run;
pub mod selector;
pub mod shell;
pub mod steps;
pub mod traits;
pub mod trigger;

pub use controller::{PipelineController, Services};
pub use environment::RuntimeFacts;
pub use errors::{ContainerError, MailError, ProvisionError, SelectionError, ShellError};
pub use gate::{Admission, ConcurrencyGate};
pub use history::{BuildHistory, RunRecord};
pub use log::LogBuffer;
pub use notifier::{NotificationEvent, Notifier};
pub use provisioner::{
    Acquisition, AgentContext, AgentHandle, ProvisionRequest, Provisioner, Scoped,
};
pub use run::{PipelineRun, RunReport};
pub use selector::{check_exclusive, select};
pub use shell::{LocalShell, expand_variables};
pub use steps::{StepExecutor, StepOutcome};
pub use traits::{
    BuildRequest, ContainerRuntime, MailMessage, MailTransport, ShellInvocation, ShellResult,
    ShellRunner, StartRequest,
};
pub use trigger::{Cause, Change, InvocationContext, evaluate};
