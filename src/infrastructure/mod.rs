//! Infrastructure layer
//!
//! Real implementations of the execution boundaries plus process-level
//! configuration and logging.

mod config;
pub mod container;
mod logging;
pub mod mail;

pub use config::{Config, ConfigError, ENV_PREFIX};
pub use container::{ContainerEngine, DockerCli};
pub use logging::{LOG_ENV, init_logging};
pub use mail::{LogTransport, MailTransportKind, SendmailTransport};
