//! Message text for domain events.
//!
//! ```
//! use solarmon_core::{ConnectedDevice, DomainEvent};
//! use solarmon_notify::format::format_event;
//!
//! let event = DomainEvent::DevicesConnected {
//!     devices: vec![ConnectedDevice {
//!         local_name: Some("Andrii 1".to_string()),
//!         address: "c8:47:80:12:9b:46".to_string(),
//!     }],
//! };
//! assert_eq!(format_event(&event), "Connected devices:\n[c8:47:80:12:9b:46] Andrii 1\n");
//! ```

use solarmon_core::{ConnectedDevice, DomainEvent};
use std::fmt::Write;

use crate::sink::PublishOptions;

/// Shown for devices that advertise no local name.
const UNNAMED: &str = "(unnamed)";

/// Render the list of connected devices, one `[address] name` line each.
pub fn devices_connected(devices: &[ConnectedDevice]) -> String {
    let mut text = String::from("Connected devices:\n");
    for device in devices {
        let name = device.local_name.as_deref().unwrap_or(UNNAMED);
        let _ = writeln!(text, "[{}] {}", device.address, name);
    }
    text
}

/// Render a battery-low warning.
pub fn battery_low(device: &str, level: u8) -> String {
    format!("Battery low: {device} at {level}%")
}

/// Render an average cell voltage report.
pub fn average_cell_voltage(device: &str, value: f64) -> String {
    format!("{device}: average cell voltage {value:.3} V")
}

/// Render any domain event.
pub fn format_event(event: &DomainEvent) -> String {
    match event {
        DomainEvent::BatteryLow { device, level } => battery_low(device, *level),
        DomainEvent::DevicesConnected { devices } => devices_connected(devices),
        DomainEvent::AverageCellVoltage { device, value, .. } => {
            average_cell_voltage(device, *value)
        }
    }
}

/// Delivery options for an event: only battery warnings make a sound.
pub fn options_for(event: &DomainEvent) -> PublishOptions {
    match event {
        DomainEvent::BatteryLow { .. } => PublishOptions::loud(),
        DomainEvent::DevicesConnected { .. } | DomainEvent::AverageCellVoltage { .. } => {
            PublishOptions::silent()
        }
    }
}
