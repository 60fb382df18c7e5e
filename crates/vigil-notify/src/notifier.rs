use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use vigil_common::types::NotificationKind;
use vigil_storage::Store;

use crate::channels::{EmailChannel, SlackChannel};
use crate::{AlertMessage, NotificationChannel};

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// `DEFAULT_ALERT_REMINDER_MINUTES`: process-wide reminder interval
    /// used when the client has not set one.
    pub default_reminder_minutes: i64,
    /// `SLACK_WEBHOOK`: fallback webhook for clients without their own.
    pub global_slack_webhook: Option<String>,
    /// `STUB_SLACK`: short-circuit the Slack provider with success.
    pub stub_slack: bool,
    pub provider_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub smtp: Option<SmtpConfig>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            default_reminder_minutes: 30,
            global_slack_webhook: None,
            stub_slack: false,
            provider_timeout_secs: 5,
            max_attempts: 5,
            backoff_base_ms: 500,
            smtp: None,
        }
    }
}

/// Cooldown ladder: the client's own reminder interval when positive,
/// otherwise the process-wide default. Zero means "no cooldown" — every
/// notify fires.
pub fn resolve_cooldown_seconds(client_reminder_seconds: i64, default_reminder_minutes: i64) -> i64 {
    if client_reminder_seconds > 0 {
        client_reminder_seconds
    } else {
        default_reminder_minutes.max(0) * 60
    }
}

/// Send decision for open/reminder notifications: the first success for a
/// subject goes out immediately, later ones only once the cooldown has
/// elapsed since the last success.
pub fn reminder_due(
    last_success: Option<DateTime<Utc>>,
    cooldown_seconds: i64,
    now: DateTime<Utc>,
) -> bool {
    match last_success {
        None => true,
        Some(last) => now - last >= Duration::seconds(cooldown_seconds),
    }
}

/// Resolves recipients and cooldown per client and drives the per-send
/// ledger protocol against the store.
pub struct Notifier {
    store: Arc<Store>,
    slack: SlackChannel,
    email: Option<EmailChannel>,
    config: NotifierConfig,
}

impl Notifier {
    pub fn new(store: Arc<Store>, config: NotifierConfig) -> anyhow::Result<Self> {
        let slack = SlackChannel::new(
            std::time::Duration::from_secs(config.provider_timeout_secs),
            config.stub_slack,
        )?;
        let email = match &config.smtp {
            Some(smtp) => Some(EmailChannel::new(
                &smtp.host,
                smtp.port,
                smtp.username.as_deref(),
                smtp.password.as_deref(),
                &smtp.from,
            )?),
            None => None,
        };
        Ok(Self {
            store,
            slack,
            email,
            config,
        })
    }

    /// Delivers one message to every enabled channel of its client.
    ///
    /// Channel failures are recorded in the notification log and do not
    /// propagate; only store errors bubble up. The cooldown gate applies
    /// to open and reminder kinds — which also dedupes outbox replays of
    /// an open — while a resolve goes out once regardless of cadence.
    pub async fn dispatch(&self, message: &AlertMessage) -> anyhow::Result<()> {
        if !message.severity.is_notifiable() {
            tracing::debug!(
                incident_id = ?message.incident_id,
                severity = %message.severity,
                "severity below notification floor, skipping"
            );
            return Ok(());
        }

        let settings = self.store.get_settings(&message.client_id).await?;

        match message.kind {
            NotificationKind::Open | NotificationKind::Reminder => {
                if let Some(ref incident_id) = message.incident_id {
                    let cooldown = resolve_cooldown_seconds(
                        settings.reminder_notification_seconds,
                        self.config.default_reminder_minutes,
                    );
                    let last = self.store.last_notification_success(incident_id).await?;
                    if !reminder_due(last, cooldown, Utc::now()) {
                        tracing::debug!(
                            incident_id = %incident_id,
                            cooldown_seconds = cooldown,
                            "cooldown active, skipping"
                        );
                        return Ok(());
                    }
                }
            }
            NotificationKind::Resolve => {
                if !settings.notify_on_resolve {
                    tracing::info!(
                        incident_id = ?message.incident_id,
                        "notify_on_resolve disabled, suppressing resolve notification"
                    );
                    return Ok(());
                }
            }
        }

        let webhook = settings
            .slack_webhook_url
            .clone()
            .filter(|u| !u.is_empty())
            .or_else(|| self.config.global_slack_webhook.clone());
        let email_to = settings.notification_email.clone().filter(|e| !e.is_empty());

        if webhook.is_none() && email_to.is_none() {
            tracing::warn!(
                client_id = %message.client_id,
                incident_id = ?message.incident_id,
                "no notification channels configured, suppressing"
            );
            return Ok(());
        }

        if let Some(url) = webhook {
            let mut m = message.clone();
            m.channel = settings.slack_channel_name.clone().filter(|c| !c.is_empty());
            self.send_with_retry(&self.slack, &m, &url).await?;
        }

        if let (Some(addr), Some(email)) = (email_to, self.email.as_ref()) {
            self.send_with_retry(email, message, &addr).await?;
        }

        Ok(())
    }

    /// One recipient: pending row, bounded attempts, terminal row. A later
    /// success after transient failures still updates last-success for the
    /// cooldown computation via `sent_at`.
    async fn send_with_retry(
        &self,
        channel: &dyn NotificationChannel,
        message: &AlertMessage,
        recipient: &str,
    ) -> anyhow::Result<()> {
        let log = self
            .store
            .insert_notification_pending(
                &message.client_id,
                message.incident_id.as_deref(),
                None,
                channel.provider(),
                recipient,
                message.kind,
                &message.render_text(),
            )
            .await?;

        let timeout = std::time::Duration::from_secs(self.config.provider_timeout_secs);
        let mut last_err = None;

        for attempt in 0..self.config.max_attempts.max(1) {
            let result = tokio::time::timeout(timeout, channel.send(message, recipient)).await;
            match result {
                Ok(Ok(())) => {
                    let now = Utc::now();
                    self.store
                        .mark_notification_result(&log.id, true, None, Some(now))
                        .await?;
                    if let Some(ref incident_id) = message.incident_id {
                        self.store.touch_incident_notified(incident_id, now).await?;
                    }
                    tracing::info!(
                        provider = channel.provider(),
                        incident_id = ?message.incident_id,
                        kind = %message.kind,
                        attempt = attempt + 1,
                        "notification sent"
                    );
                    return Ok(());
                }
                Ok(Err(e)) if e.is_transient() => {
                    tracing::warn!(
                        provider = channel.provider(),
                        attempt = attempt + 1,
                        error = %e,
                        "transient notification failure, backing off"
                    );
                    last_err = Some(e.to_string());
                }
                Ok(Err(e)) => {
                    tracing::error!(
                        provider = channel.provider(),
                        incident_id = ?message.incident_id,
                        error = %e,
                        "permanent notification failure"
                    );
                    self.store
                        .mark_notification_result(&log.id, false, Some(&e.to_string()), None)
                        .await?;
                    return Ok(());
                }
                Err(_) => {
                    tracing::warn!(
                        provider = channel.provider(),
                        attempt = attempt + 1,
                        "notification attempt timed out"
                    );
                    last_err = Some("provider call timed out".to_string());
                }
            }

            if attempt + 1 < self.config.max_attempts {
                let delay = self.config.backoff_base_ms * 2u64.pow(attempt);
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
        }

        self.store
            .mark_notification_result(&log.id, false, last_err.as_deref(), None)
            .await?;
        Ok(())
    }
}
