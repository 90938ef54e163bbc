use thiserror::Error;

/// Errors raised while publishing notifications.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Message rejected (status {status}): {description}")]
    Rejected { status: u16, description: String },

    #[error("Notification channel closed")]
    ChannelClosed,

    #[error("Notification sink not configured: {0}")]
    NotConfigured(String),
}

impl NotifyError {
    /// Create a rejection error.
    pub fn rejected(status: u16, description: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            description: description.into(),
        }
    }

    /// Create a not-configured error.
    pub fn not_configured(what: impl Into<String>) -> Self {
        Self::NotConfigured(what.into())
    }
}

pub type Result<T> = std::result::Result<T, NotifyError>;
