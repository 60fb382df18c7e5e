use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::{AlertMessage, NotificationChannel, NotifyError, Result};

/// SMTP submission over STARTTLS. The subject line carries severity and
/// kind; the body is the rendered incident description.
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl EmailChannel {
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        username: Option<&str>,
        password: Option<&str>,
        from: &str,
    ) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(smtp_host)
            .map_err(|e| NotifyError::InvalidConfig(format!("smtp relay: {e}")))?
            .port(smtp_port);

        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }

        Ok(Self {
            transport: builder.build(),
            from: from.to_string(),
        })
    }

    fn subject(message: &AlertMessage) -> String {
        let tag = match message.kind {
            vigil_common::types::NotificationKind::Resolve => " [RESOLVED]",
            vigil_common::types::NotificationKind::Reminder => " [REMINDER]",
            vigil_common::types::NotificationKind::Open => "",
        };
        format!("[vigil][{}]{} {}", message.severity, tag, message.title)
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    async fn send(&self, message: &AlertMessage, recipient: &str) -> Result<()> {
        let from = self
            .from
            .parse()
            .map_err(|_| NotifyError::InvalidConfig(format!("bad from address: {}", self.from)))?;
        let to = recipient
            .parse()
            .map_err(|_| NotifyError::InvalidRecipient(recipient.to_string()))?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(Self::subject(message))
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| NotifyError::Other(format!("build email: {e}")))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;
        Ok(())
    }

    fn provider(&self) -> &'static str {
        "email"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::types::{NotificationKind, Severity};

    #[test]
    fn subject_tags_kind_and_severity() {
        let m = AlertMessage {
            client_id: "c1".to_string(),
            incident_id: None,
            kind: NotificationKind::Resolve,
            severity: Severity::Warning,
            title: "cpu_load back to normal on web-01".to_string(),
            body: String::new(),
            channel: None,
        };
        assert_eq!(
            EmailChannel::subject(&m),
            "[vigil][warning] [RESOLVED] cpu_load back to normal on web-01"
        );
    }
}
