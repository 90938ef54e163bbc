//! Outbound notifications for solarmon.
//!
//! Domain events from the device core are rendered to text by [`format`]
//! and delivered through an [`EventSink`]: the Telegram Bot API in
//! production, the log when no chat is configured, or an in-memory channel
//! in tests. [`EventPublisher`] sits in between and applies per-event
//! delivery options and voltage report throttling.

pub mod error;
pub mod format;
pub mod publisher;
pub mod sink;
pub mod telegram;

pub use error::{NotifyError, Result};
pub use publisher::EventPublisher;
pub use sink::{AnySink, EventSink, LogSink, MemorySink, PublishOptions, SentMessage};
pub use telegram::TelegramSink;
