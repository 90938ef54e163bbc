//! Notification sinks.
//!
//! A sink delivers a finished text message to wherever the operator reads
//! it. Sinks use native `async fn` in traits, which is not object-safe, so
//! runtime selection goes through the [`AnySink`] enum instead of
//! `Box<dyn EventSink>`.

use std::future::Future;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::{NotifyError, Result};
use crate::telegram::TelegramSink;

/// Capacity of the [`MemorySink`] channel.
const MEMORY_CHANNEL_CAPACITY: usize = 64;

/// Per-message delivery options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Deliver without a sound or a push alert.
    pub silent: bool,
}

impl PublishOptions {
    /// Silent delivery.
    #[must_use]
    pub const fn silent() -> Self {
        Self { silent: true }
    }

    /// Delivery with an alert.
    #[must_use]
    pub const fn loud() -> Self {
        Self { silent: false }
    }
}

/// Destination for notification messages.
pub trait EventSink: Send + Sync {
    /// Deliver one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message could not be delivered; the caller
    /// decides whether to retry or drop it.
    fn publish(&self, message: &str, options: PublishOptions)
    -> impl Future<Output = Result<()>> + Send;
}

/// Sink that writes messages to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    async fn publish(&self, message: &str, options: PublishOptions) -> Result<()> {
        info!(silent = options.silent, "{}", message.trim_end());
        Ok(())
    }
}

/// Message captured by a [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub text: String,
    pub silent: bool,
}

/// Sink that hands messages to an in-process channel.
///
/// # Examples
///
/// ```
/// use solarmon_notify::{EventSink, MemorySink, PublishOptions};
///
/// #[tokio::main]
/// async fn main() -> solarmon_notify::Result<()> {
///     let (sink, mut messages) = MemorySink::new();
///     sink.publish("hello", PublishOptions::silent()).await?;
///
///     let message = messages.recv().await.unwrap();
///     assert_eq!(message.text, "hello");
///     assert!(message.silent);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemorySink {
    tx: mpsc::Sender<SentMessage>,
}

impl MemorySink {
    /// Create a sink and the receiver of everything it publishes.
    pub fn new() -> (Self, mpsc::Receiver<SentMessage>) {
        let (tx, rx) = mpsc::channel(MEMORY_CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }
}

impl EventSink for MemorySink {
    async fn publish(&self, message: &str, options: PublishOptions) -> Result<()> {
        self.tx
            .send(SentMessage {
                text: message.to_string(),
                silent: options.silent,
            })
            .await
            .map_err(|_| NotifyError::ChannelClosed)
    }
}

/// Enum wrapper for sink dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnySink {
    /// Telegram Bot API.
    Telegram(TelegramSink),

    /// Log output only.
    Log(LogSink),

    /// In-process channel for tests.
    Memory(MemorySink),
}

impl EventSink for AnySink {
    async fn publish(&self, message: &str, options: PublishOptions) -> Result<()> {
        match self {
            Self::Telegram(sink) => sink.publish(message, options).await,
            Self::Log(sink) => sink.publish(message, options).await,
            Self::Memory(sink) => sink.publish(message, options).await,
        }
    }
}

impl From<TelegramSink> for AnySink {
    fn from(sink: TelegramSink) -> Self {
        Self::Telegram(sink)
    }
}

impl From<LogSink> for AnySink {
    fn from(sink: LogSink) -> Self {
        Self::Log(sink)
    }
}

impl From<MemorySink> for AnySink {
    fn from(sink: MemorySink) -> Self {
        Self::Memory(sink)
    }
}
