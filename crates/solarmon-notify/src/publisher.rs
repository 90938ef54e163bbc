//! Domain event publisher.
//!
//! Turns [`DomainEvent`]s into messages on an [`EventSink`]. Average cell
//! voltage reports are throttled per device, since a streaming BMS sends a
//! cell info frame every second or so.

use solarmon_core::DomainEvent;
use solarmon_core::config::EventsConfig;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::Result;
use crate::format::{format_event, options_for};
use crate::sink::EventSink;

/// Publishes domain events to a sink.
///
/// # Examples
///
/// ```
/// use solarmon_core::DomainEvent;
/// use solarmon_core::config::EventsConfig;
/// use solarmon_notify::{EventPublisher, MemorySink};
///
/// #[tokio::main]
/// async fn main() -> solarmon_notify::Result<()> {
///     let (sink, mut messages) = MemorySink::new();
///     let mut publisher = EventPublisher::new(sink, &EventsConfig::default());
///
///     let event = DomainEvent::BatteryLow { device: "Andrii 1".to_string(), level: 12 };
///     assert!(publisher.publish(&event).await?);
///     assert!(!messages.recv().await.unwrap().silent);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct EventPublisher<S> {
    sink: S,
    voltage_interval: Duration,
    last_voltage: HashMap<String, Instant>,
}

impl<S: EventSink> EventPublisher<S> {
    /// Create a publisher.
    pub fn new(sink: S, config: &EventsConfig) -> Self {
        Self {
            sink,
            voltage_interval: config.voltage_report_interval(),
            last_voltage: HashMap::new(),
        }
    }

    /// The underlying sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Publish one event.
    ///
    /// Returns `false` when the event was throttled.
    ///
    /// # Errors
    ///
    /// Returns the sink's error if delivery failed. A failed voltage report
    /// does not count against the throttle.
    pub async fn publish(&mut self, event: &DomainEvent) -> Result<bool> {
        if let DomainEvent::AverageCellVoltage { device, .. } = event
            && self.throttled(device)
        {
            trace!("Throttled {}", event);
            return Ok(false);
        }

        let text = format_event(event);
        self.sink.publish(&text, options_for(event)).await?;
        debug!("Published {}", event);

        if let DomainEvent::AverageCellVoltage { device, .. } = event {
            self.last_voltage.insert(device.clone(), Instant::now());
        }
        Ok(true)
    }

    fn throttled(&self, device: &str) -> bool {
        if self.voltage_interval.is_zero() {
            return false;
        }
        self.last_voltage
            .get(device)
            .is_some_and(|last| last.elapsed() < self.voltage_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use chrono::Utc;

    fn voltage(device: &str, value: f64) -> DomainEvent {
        DomainEvent::AverageCellVoltage {
            device: device.to_string(),
            value,
            at: Utc::now(),
        }
    }

    fn config(interval_ms: u64) -> EventsConfig {
        EventsConfig {
            voltage_report_interval_ms: interval_ms,
            ..EventsConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_voltage_reports_are_throttled_per_device() {
        let (sink, mut messages) = MemorySink::new();
        let mut publisher = EventPublisher::new(sink, &config(60_000));

        assert!(publisher.publish(&voltage("Andrii 1", 3.3)).await.unwrap());
        assert!(!publisher.publish(&voltage("Andrii 1", 3.31)).await.unwrap());
        assert!(publisher.publish(&voltage("Andrii 2", 3.2)).await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(publisher.publish(&voltage("Andrii 1", 3.32)).await.unwrap());

        let texts: Vec<_> = std::iter::from_fn(|| messages.try_recv().ok())
            .map(|m| m.text)
            .collect();
        assert_eq!(
            texts,
            vec![
                "Andrii 1: average cell voltage 3.300 V",
                "Andrii 2: average cell voltage 3.200 V",
                "Andrii 1: average cell voltage 3.320 V",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_publishes_every_frame() {
        let (sink, mut messages) = MemorySink::new();
        let mut publisher = EventPublisher::new(sink, &config(0));

        for _ in 0..3 {
            assert!(publisher.publish(&voltage("Andrii 1", 3.3)).await.unwrap());
        }
        assert_eq!(std::iter::from_fn(|| messages.try_recv().ok()).count(), 3);
    }

    #[tokio::test]
    async fn test_other_events_are_never_throttled() {
        let (sink, mut messages) = MemorySink::new();
        let mut publisher = EventPublisher::new(sink, &EventsConfig::default());
        let low = DomainEvent::BatteryLow {
            device: "Andrii 1".to_string(),
            level: 10,
        };

        assert!(publisher.publish(&low).await.unwrap());
        assert!(publisher.publish(&low).await.unwrap());
        assert_eq!(std::iter::from_fn(|| messages.try_recv().ok()).count(), 2);
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_consume_throttle() {
        let (sink, messages) = MemorySink::new();
        let mut publisher = EventPublisher::new(sink, &EventsConfig::default());
        drop(messages);

        assert!(publisher.publish(&voltage("Andrii 1", 3.3)).await.is_err());
        assert!(publisher.last_voltage.is_empty());
    }
}
