//! Domain events raised by the device core.
//!
//! Events are produced by the connection lifecycle and handed to the
//! notification layer, which turns them into text for the outbound channel.

use crate::DiscoveredPeripheral;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connected device as reported in `devices.connected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedDevice {
    #[serde(rename = "localName")]
    pub local_name: Option<String>,
    pub address: String,
}

impl From<&DiscoveredPeripheral> for ConnectedDevice {
    fn from(peripheral: &DiscoveredPeripheral) -> Self {
        Self {
            local_name: peripheral.local_name.clone(),
            address: peripheral.address.clone(),
        }
    }
}

/// Event raised by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum DomainEvent {
    /// Battery level dropped below the configured threshold.
    #[serde(rename = "battery.low")]
    BatteryLow {
        device: String,
        level: u8,
    },

    /// The set of connected devices changed.
    #[serde(rename = "devices.connected")]
    DevicesConnected {
        devices: Vec<ConnectedDevice>,
    },

    /// Mean of the populated cell voltages of one cell info frame.
    #[serde(rename = "average.cell.voltage")]
    AverageCellVoltage {
        device: String,
        value: f64,
        at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Dotted event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::BatteryLow { .. } => "battery.low",
            DomainEvent::DevicesConnected { .. } => "devices.connected",
            DomainEvent::AverageCellVoltage { .. } => "average.cell.voltage",
        }
    }
}

impl fmt::Display for DomainEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DomainEvent::BatteryLow { device, level } => {
                write!(f, "battery.low({device}: {level}%)")
            }
            DomainEvent::DevicesConnected { devices } => {
                write!(f, "devices.connected({} devices)", devices.len())
            }
            DomainEvent::AverageCellVoltage { device, value, .. } => {
                write!(f, "average.cell.voltage({device}: {value:.3}V)")
            }
        }
    }
}
