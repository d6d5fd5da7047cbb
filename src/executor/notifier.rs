//! Failure notification
//!
//! Renders the configured e-mail for a failed or timed-out run and hands it
//! to the mail transport. Delivery is best-effort: transport errors are
//! logged and never change the run's status.
//!
//! Templates use emailext-style placeholders:
//!
//! | Placeholder | Value |
//! |-------------|-------|
//! | `$PROJECT_NAME` | Project name |
//! | `$BUILD_NUMBER` | Build number |
//! | `$BUILD_STATUS` | `FAILURE` or `TIMEOUT` |
//! | `$BRANCH_NAME` | Active branch |
//! | `$CAUSE` | What started the run |
//! | `$CHANGES` | One line per change |
//! | `${BUILD_LOG}` | Log tail, `${BUILD_LOG, maxLines=N}` overrides its length |

use super::log::LogBuffer;
use super::traits::{MailMessage, MailTransport};
use super::trigger::InvocationContext;
use crate::pipeline::{EmailNotification, RecipientProvider, RunStatus, TriggerFacts};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\$\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:,\s*maxLines\s*=\s*(\d+)\s*)?\}|\$([A-Za-z_][A-Za-z0-9_]*)",
    )
    .unwrap()
});

/// Everything a failure notification says about a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// Project name
    pub project: String,
    /// Build number
    pub build_number: u64,
    /// Terminal status, `Failed` or `TimedOut`
    pub status: RunStatus,
    /// Active branch
    pub branch: String,
    /// Cause description
    pub cause: String,
    /// Change summary
    pub changes: String,
    /// Bounded log tail, oldest first
    pub log_tail: Vec<String>,
    /// Resolved, de-duplicated recipients
    pub recipients: Vec<String>,
    /// Reply-To address
    pub reply_to: Option<String>,
}

/// Sends the failure e-mail of one pipeline
#[derive(Clone)]
pub struct Notifier {
    config: EmailNotification,
    transport: Arc<dyn MailTransport>,
    from: Option<String>,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("config", &self.config)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

impl Notifier {
    /// Creates a notifier for an e-mail configuration
    #[must_use]
    pub fn new(config: EmailNotification, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            config,
            transport,
            from: None,
        }
    }

    /// Sets the sender address
    #[must_use]
    pub fn with_from(mut self, from: Option<String>) -> Self {
        self.from = from;
        self
    }

    /// Largest log tail any template asks for
    #[must_use]
    pub fn log_capacity(&self) -> usize {
        [&self.config.subject, &self.config.body]
            .into_iter()
            .flat_map(|template| PLACEHOLDER.captures_iter(template))
            .filter_map(|caps| caps.get(2).and_then(|n| n.as_str().parse::<usize>().ok()))
            .fold(self.config.log_lines, usize::max)
    }

    /// Resolves the recipient providers in order, dropping duplicates
    #[must_use]
    pub fn resolve_recipients(&self, invocation: &InvocationContext) -> Vec<String> {
        let authors = || {
            invocation.changes.iter().filter_map(|change| {
                change
                    .email
                    .clone()
                    .or_else(|| change.author.contains('@').then(|| change.author.clone()))
            })
        };

        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for provider in &self.config.recipients {
            let addresses: Vec<String> = match provider {
                RecipientProvider::Static(list) => list.clone(),
                RecipientProvider::Culprits | RecipientProvider::Developers => authors().collect(),
                RecipientProvider::Requestor => invocation
                    .requestor()
                    .filter(|user| user.contains('@'))
                    .into_iter()
                    .collect(),
            };
            for address in addresses {
                if seen.insert(address.to_lowercase()) {
                    resolved.push(address);
                }
            }
        }
        resolved
    }

    /// Builds the event for a terminal run; `None` unless it failed or timed out
    #[must_use]
    pub fn event(
        &self,
        invocation: &InvocationContext,
        facts: &TriggerFacts,
        build_number: u64,
        status: RunStatus,
        log: &LogBuffer,
    ) -> Option<NotificationEvent> {
        if !status.is_failure() {
            return None;
        }
        Some(NotificationEvent {
            project: invocation.project.clone(),
            build_number,
            status,
            branch: facts.branch.clone(),
            cause: invocation.cause_description(),
            changes: invocation.change_summary(),
            log_tail: log.tail(self.log_capacity()),
            recipients: self.resolve_recipients(invocation),
            reply_to: self.config.reply_to.clone(),
        })
    }

    /// Expands placeholders in `template`; unknown names are left untouched
    #[must_use]
    pub fn render(&self, template: &str, event: &NotificationEvent) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures| {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(3))
                    .map_or("", |m| m.as_str());
                match name {
                    "PROJECT_NAME" => event.project.clone(),
                    "BUILD_NUMBER" => event.build_number.to_string(),
                    "BUILD_STATUS" => event.status.to_string(),
                    "BRANCH_NAME" => event.branch.clone(),
                    "CAUSE" => event.cause.clone(),
                    "CHANGES" => event.changes.clone(),
                    "BUILD_LOG" => {
                        let max_lines = caps
                            .get(2)
                            .and_then(|n| n.as_str().parse::<usize>().ok())
                            .unwrap_or(self.config.log_lines);
                        let start = event.log_tail.len().saturating_sub(max_lines);
                        event.log_tail[start..].join("\n")
                    }
                    _ => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Rendered message for an event
    #[must_use]
    pub fn message(&self, event: &NotificationEvent) -> MailMessage {
        MailMessage {
            from: self.from.clone(),
            to: event.recipients.clone(),
            reply_to: event.reply_to.clone(),
            subject: self.render(&self.config.subject, event),
            body: self.render(&self.config.body, event),
        }
    }

    /// Delivers the notification, best-effort
    pub async fn notify(&self, event: &NotificationEvent) {
        if event.recipients.is_empty() {
            tracing::warn!(
                build = event.build_number,
                status = %event.status,
                "No recipients resolved, skipping failure notification"
            );
            return;
        }

        let message = self.message(event);
        match self.transport.send(&message).await {
            Ok(()) => tracing::info!(
                build = event.build_number,
                recipients = message.to.len(),
                "Failure notification sent"
            ),
            Err(err) => tracing::warn!(
                build = event.build_number,
                error = %err,
                "Failed to deliver failure notification"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::errors::MailError;
    use crate::executor::trigger::{Cause, Change};
    use crate::pipeline::TriggerCause;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<MailMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl MailTransport for Outbox {
        async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
            if self.fail {
                return Err(MailError::Transport("connection refused".to_string()));
            }
            self.sent.lock().push(message.clone());
            Ok(())
        }
    }

    fn invocation() -> InvocationContext {
        InvocationContext::new("plenoptic")
            .with_branch("main")
            .with_cause(Cause::Timer)
            .with_change(Change::new("Ada", "Speed up tests").with_email("ada@example.org"))
            .with_change(Change::new("bob@example.org", "Fix docs"))
            .with_change(Change::new("Ada", "Follow-up").with_email("ADA@example.org"))
    }

    fn log(lines: usize) -> LogBuffer {
        let log = LogBuffer::new();
        for i in 1..=lines {
            log.push(format!("line {i}"));
        }
        log
    }

    fn facts() -> TriggerFacts {
        TriggerFacts::new(TriggerCause::Timer, "main")
    }

    #[test]
    fn test_recipients_are_deduplicated_in_order() {
        let config = EmailNotification::new()
            .recipient(RecipientProvider::Static(vec!["bob@example.org".to_string()]))
            .recipient(RecipientProvider::Culprits)
            .recipient(RecipientProvider::Developers)
            .recipient(RecipientProvider::Requestor);
        let notifier = Notifier::new(config, Arc::new(Outbox::default()));

        assert_eq!(
            notifier.resolve_recipients(&invocation().with_requested_by("ops@example.org")),
            vec!["bob@example.org", "ada@example.org", "ops@example.org"]
        );
    }

    #[test]
    fn test_event_only_for_failures() {
        let notifier = Notifier::new(EmailNotification::new(), Arc::new(Outbox::default()));
        let log = log(3);
        assert!(
            notifier
                .event(&invocation(), &facts(), 1, RunStatus::Succeeded, &log)
                .is_none()
        );
        assert!(
            notifier
                .event(&invocation(), &facts(), 1, RunStatus::Aborted, &log)
                .is_none()
        );
        assert!(
            notifier
                .event(&invocation(), &facts(), 1, RunStatus::TimedOut, &log)
                .is_some()
        );
    }

    #[test]
    fn test_render_placeholders() {
        let config = EmailNotification::new()
            .recipient(RecipientProvider::Culprits)
            .log_lines(2)
            .body("${PROJECT_NAME}#$BUILD_NUMBER on $BRANCH_NAME: $BUILD_STATUS ($CAUSE) $UNKNOWN\n${BUILD_LOG}");
        let notifier = Notifier::new(config, Arc::new(Outbox::default()));
        let event = notifier
            .event(&invocation(), &facts(), 42, RunStatus::Failed, &log(10))
            .unwrap();

        assert_eq!(
            notifier.render(&notifier.config.body, &event),
            "plenoptic#42 on main: FAILURE (Started by timer) $UNKNOWN\nline 9\nline 10"
        );
        assert_eq!(
            notifier.render(&notifier.config.subject, &event),
            "plenoptic - Build # 42 - FAILURE!"
        );
    }

    #[test]
    fn test_render_build_log_max_lines() {
        let config = EmailNotification::new()
            .recipient(RecipientProvider::Culprits)
            .log_lines(1)
            .body("${BUILD_LOG, maxLines=3}|${BUILD_LOG}");
        let notifier = Notifier::new(config, Arc::new(Outbox::default()));
        assert_eq!(notifier.log_capacity(), 3);

        let event = notifier
            .event(&invocation(), &facts(), 1, RunStatus::Failed, &log(10))
            .unwrap();
        assert_eq!(event.log_tail.len(), 3);
        assert_eq!(
            notifier.render(&notifier.config.body, &event),
            "line 8\nline 9\nline 10|line 10"
        );
    }

    #[tokio::test]
    async fn test_notify_sends_rendered_message() {
        let outbox = Arc::new(Outbox::default());
        let config = EmailNotification::new()
            .recipient(RecipientProvider::Culprits)
            .reply_to("ci@example.org");
        let notifier =
            Notifier::new(config, outbox.clone()).with_from(Some("runline@example.org".to_string()));
        let event = notifier
            .event(&invocation(), &facts(), 7, RunStatus::TimedOut, &log(1))
            .unwrap();

        notifier.notify(&event).await;

        let sent = outbox.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "plenoptic - Build # 7 - TIMEOUT!");
        assert_eq!(sent[0].to, vec!["ada@example.org", "bob@example.org"]);
        assert_eq!(sent[0].reply_to.as_deref(), Some("ci@example.org"));
        assert!(sent[0].body.contains("line 1"));
    }

    #[tokio::test]
    async fn test_notify_swallows_transport_errors_and_skips_empty() {
        let outbox = Arc::new(Outbox {
            fail: true,
            ..Outbox::default()
        });
        let config = EmailNotification::new().recipient(RecipientProvider::Requestor);
        let notifier = Notifier::new(config, outbox.clone());

        let no_requestor = notifier
            .event(&invocation(), &facts(), 1, RunStatus::Failed, &log(1))
            .unwrap();
        assert!(no_requestor.recipients.is_empty());
        notifier.notify(&no_requestor).await;

        let with_requestor = notifier
            .event(
                &invocation().with_requested_by("ops@example.org"),
                &facts(),
                1,
                RunStatus::Failed,
                &log(1),
            )
            .unwrap();
        notifier.notify(&with_requestor).await;
        assert!(outbox.sent.lock().is_empty());
    }
}
