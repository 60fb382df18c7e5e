/// Errors that can occur within the notification subsystem.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Channel configuration is missing a required field or contains an
    /// invalid value.
    #[error("Notify: invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// The recipient address cannot possibly work (malformed email).
    /// Never retried.
    #[error("Notify: invalid recipient '{0}'")]
    InvalidRecipient(String),

    /// An HTTP request to an external notification endpoint failed at the
    /// transport level (DNS, TCP, TLS, timeout).
    #[error("Notify: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// SMTP transport error when sending email.
    #[error("Notify: SMTP error: {0}")]
    Smtp(String),

    /// The external API answered with a non-success status.
    #[error("Notify: {provider} returned status={status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    /// JSON serialization failure while building a payload.
    #[error("Notify: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic notification error for cases not covered by other variants.
    #[error("Notify: {0}")]
    Other(String),
}

impl NotifyError {
    /// Transient failures are retried with bounded backoff; everything
    /// else is marked failed immediately. A 429 from a webhook counts as
    /// transient like a 5xx; other 4xx means the payload or endpoint is
    /// wrong and will not improve on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            NotifyError::Http(_) | NotifyError::Smtp(_) => true,
            NotifyError::Api { status, .. } => *status == 429 || *status >= 500,
            NotifyError::InvalidConfig(_)
            | NotifyError::InvalidRecipient(_)
            | NotifyError::Json(_)
            | NotifyError::Other(_) => false,
        }
    }
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
