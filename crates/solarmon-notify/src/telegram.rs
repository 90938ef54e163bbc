//! Telegram Bot API sink.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::error::{NotifyError, Result};
use crate::sink::{EventSink, PublishOptions};

/// Public Bot API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_notification: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Sink posting messages to a Telegram chat.
#[derive(Clone)]
pub struct TelegramSink {
    client: reqwest::Client,
    base_url: String,
    token: String,
    chat_id: String,
    silent_by_default: bool,
}

impl TelegramSink {
    /// Create a sink for the public Bot API.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::NotConfigured` if the token or chat id is
    /// blank, or `NotifyError::Http` if the HTTP client cannot be built.
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("solarmon/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Self::from_reqwest(DEFAULT_API_URL, client, token, chat_id)
    }

    /// Create a sink on an existing client and API base URL.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::NotConfigured` if the token or chat id is blank.
    pub fn from_reqwest(
        base_url: &str,
        client: reqwest::Client,
        token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Result<Self> {
        let token = token.into();
        let chat_id = chat_id.into();
        if token.trim().is_empty() {
            return Err(NotifyError::not_configured("telegram bot token"));
        }
        if chat_id.trim().is_empty() {
            return Err(NotifyError::not_configured("telegram chat_id"));
        }

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            chat_id,
            silent_by_default: false,
        })
    }

    /// Deliver every message silently.
    #[must_use]
    pub fn with_silent_by_default(mut self, silent: bool) -> Self {
        self.silent_by_default = silent;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, self.token)
    }
}

impl fmt::Debug for TelegramSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramSink")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("silent_by_default", &self.silent_by_default)
            .finish()
    }
}

impl EventSink for TelegramSink {
    async fn publish(&self, message: &str, options: PublishOptions) -> Result<()> {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text: message,
            disable_notification: options.silent || self.silent_by_default,
        };

        let response = self.client.post(self.endpoint()).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        let parsed: Option<ApiResponse> = serde_json::from_str(&text).ok();

        match parsed {
            Some(ApiResponse { ok: true, .. }) if status.is_success() => {
                debug!(chat_id = %self.chat_id, "Message delivered");
                Ok(())
            }
            Some(ApiResponse { description, .. }) => Err(NotifyError::rejected(
                status.as_u16(),
                description.unwrap_or_else(|| "no description".to_string()),
            )),
            None => Err(NotifyError::rejected(status.as_u16(), text)),
        }
    }
}
