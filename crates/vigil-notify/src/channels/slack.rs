use async_trait::async_trait;
use std::time::Duration;

use crate::{AlertMessage, NotificationChannel, NotifyError, Result};

/// Posts `{text, channel?}` to a client-configured incoming-webhook URL.
/// Success is any 2xx inside the timeout.
pub struct SlackChannel {
    client: reqwest::Client,
    /// `STUB_SLACK`: short-circuit with success without touching the
    /// network. Used in development and tests.
    stub: bool,
}

impl SlackChannel {
    pub fn new(timeout: Duration, stub: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(NotifyError::Http)?;
        Ok(Self { client, stub })
    }

    fn payload(message: &AlertMessage) -> serde_json::Value {
        let mut payload = serde_json::json!({ "text": message.render_text() });
        if let Some(ref channel) = message.channel {
            payload["channel"] = serde_json::Value::String(channel.clone());
        }
        payload
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    async fn send(&self, message: &AlertMessage, recipient: &str) -> Result<()> {
        if self.stub {
            tracing::info!(
                incident_id = ?message.incident_id,
                kind = %message.kind,
                "STUB_SLACK set, skipping webhook delivery"
            );
            return Ok(());
        }

        let resp = self
            .client
            .post(recipient)
            .json(&Self::payload(message))
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(NotifyError::Api {
            provider: "slack",
            status: status.as_u16(),
            body: truncate(&body, 500),
        })
    }

    fn provider(&self) -> &'static str {
        "slack"
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::types::{NotificationKind, Severity};

    fn message() -> AlertMessage {
        AlertMessage {
            client_id: "c1".to_string(),
            incident_id: Some("inc-1".to_string()),
            kind: NotificationKind::Open,
            severity: Severity::Critical,
            title: "HTTP check failed: api".to_string(),
            body: "https://example.com — status 0".to_string(),
            channel: Some("#alerts".to_string()),
        }
    }

    #[test]
    fn payload_carries_text_and_optional_channel() {
        let p = SlackChannel::payload(&message());
        assert!(p["text"].as_str().unwrap().starts_with("[CRITICAL] "));
        assert_eq!(p["channel"], "#alerts");

        let mut m = message();
        m.channel = None;
        let p = SlackChannel::payload(&m);
        assert!(p.get("channel").is_none());
    }

    #[tokio::test]
    async fn stub_mode_short_circuits() {
        let ch = SlackChannel::new(Duration::from_secs(1), true).unwrap();
        ch.send(&message(), "https://hooks.invalid/unused").await.unwrap();
    }
}
