//! Mail transports

use crate::executor::{MailError, MailMessage, MailTransport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Which transport delivers notifications
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailTransportKind {
    /// Emit messages through tracing only
    #[default]
    Log,
    /// Pipe messages to a sendmail-compatible binary
    Sendmail,
}

/// Writes notifications to the log instead of sending them
#[derive(Debug, Clone, Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        tracing::info!(
            to = %message.to.join(", "),
            subject = %message.subject,
            "Notification (log transport)"
        );
        tracing::debug!(body = %message.body, "Notification body");
        Ok(())
    }
}

/// Delivers through `sendmail -t`, recipients are read from the headers
#[derive(Debug, Clone)]
pub struct SendmailTransport {
    program: PathBuf,
}

impl SendmailTransport {
    /// Creates a transport using the given sendmail binary
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SendmailTransport {
    fn default() -> Self {
        Self::new("/usr/sbin/sendmail")
    }
}

#[async_trait]
impl MailTransport for SendmailTransport {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        let mut child = Command::new(&self.program)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MailError::Transport(format!("{}: {e}", self.program.display())))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| MailError::Transport("sendmail stdin unavailable".to_string()))?;
        stdin.write_all(message.to_rfc5322().as_bytes()).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(MailError::Transport(format!(
                "sendmail exited with {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}
