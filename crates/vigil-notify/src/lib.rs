//! Notification delivery with per-subject cooldowns.
//!
//! Incidents produce [`AlertMessage`]s which the [`notifier::Notifier`]
//! fans out to the client's configured channels (Slack webhook, SMTP
//! email). Every send follows the same ledger protocol: a pending row in
//! the notification log before the external call, success/failed after,
//! and the recorded `sent_at` of the last success drives the reminder
//! cooldown for the subject.

pub mod channels;
pub mod error;
pub mod notifier;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use vigil_common::types::{NotificationKind, Severity};

pub use error::{NotifyError, Result};
pub use notifier::{Notifier, NotifierConfig, SmtpConfig};

/// One rendered notification, independent of the channel that will carry
/// it.
#[derive(Debug, Clone)]
pub struct AlertMessage {
    pub client_id: String,
    pub incident_id: Option<String>,
    pub kind: NotificationKind,
    pub severity: Severity,
    pub title: String,
    pub body: String,
    /// Slack channel override from the client's settings; `None` posts to
    /// the webhook's default channel.
    pub channel: Option<String>,
}

impl AlertMessage {
    /// Single-line rendering used by the Slack wire format and the log.
    pub fn render_text(&self) -> String {
        format!("[{}] {}\n{}", self.severity.to_string().to_uppercase(), self.title, self.body)
    }
}

/// A delivery channel for one provider (Slack, email, ...).
///
/// `recipient` is whatever addresses the provider: a webhook URL for
/// Slack, an email address for SMTP. Implementations do one attempt; the
/// retry policy lives in the notifier.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, message: &AlertMessage, recipient: &str) -> Result<()>;

    /// Provider name recorded in the notification log (`"slack"`,
    /// `"email"`).
    fn provider(&self) -> &'static str;
}
