//! BLE adapter capability.
//!
//! This module defines the contract between the connection layer and the
//! host radio stack. The core never touches radio handles directly: it refers
//! to peripherals by hardware address and lets the adapter resolve them, which
//! keeps the lifecycle logic identical for the btleplug backend and the
//! scripted [`MockAdapter`](crate::mock::MockAdapter).
//!
//! Every method returns a `Send` future. Implementations write them as
//! `async fn`.
//!
//! # Event Flow
//!
//! ```text
//!   radio stack ──► BleAdapter::events() ──► DeviceManager event loop
//!                                                 │
//!                   BleAdapter::notifications(addr) ──► ConnectionLifecycle
//! ```

use bytes::Bytes;
use solarmon_core::{DiscoveredPeripheral, GattCharacteristicRef, GattService, GattUuid};
use std::fmt;
use std::future::Future;
use tokio::sync::mpsc;

use crate::error::Result;

/// Power and authorization state of the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterState {
    /// State not yet reported.
    Unknown,

    /// Radio on and usable.
    PoweredOn,

    /// Radio switched off.
    PoweredOff,

    /// The process is not allowed to use Bluetooth.
    Unauthorized,

    /// The host has no usable BLE controller.
    Unsupported,
}

impl AdapterState {
    /// Whether scanning can run in this state.
    #[must_use]
    pub fn is_usable(self) -> bool {
        matches!(self, AdapterState::PoweredOn)
    }

    /// Whether this state ends scanning for the adapter instance.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AdapterState::PoweredOff | AdapterState::Unauthorized | AdapterState::Unsupported
        )
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterState::Unknown => write!(f, "unknown"),
            AdapterState::PoweredOn => write!(f, "powered on"),
            AdapterState::PoweredOff => write!(f, "powered off"),
            AdapterState::Unauthorized => write!(f, "unauthorized"),
            AdapterState::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Event emitted by the adapter.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum AdapterEvent {
    /// Adapter power or authorization state changed.
    StateChanged(AdapterState),

    /// An advertisement was received.
    Discovered(DiscoveredPeripheral),

    /// A link to the peripheral at this address came up.
    Connected(String),

    /// The link to the peripheral at this address went down.
    Disconnected(String),
}

/// Value pushed by a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Characteristic that produced the value.
    pub characteristic: GattUuid,

    /// Raw payload.
    pub value: Bytes,
}

impl Notification {
    /// Create a notification.
    pub fn new(characteristic: GattUuid, value: impl Into<Bytes>) -> Self {
        Self {
            characteristic,
            value: value.into(),
        }
    }
}

/// BLE central capability consumed by the connection layer.
///
/// Peripherals are addressed by the `address` of their
/// [`DiscoveredPeripheral`]. Every call may suspend; none of them may block
/// the runtime.
///
/// # Examples
///
/// ```no_run
/// use solarmon_ble::adapter::BleAdapter;
/// use solarmon_ble::Result;
///
/// async fn dump_characteristics<A: BleAdapter>(adapter: &A, address: &str) -> Result<()> {
///     adapter.connect(address).await?;
///     for service in adapter.discover_services(address).await? {
///         for characteristic in adapter.discover_characteristics(address, &service).await? {
///             println!("{characteristic}");
///         }
///     }
///     adapter.disconnect(address).await
/// }
/// ```
pub trait BleAdapter: Send + Sync + 'static {
    /// Open the adapter event stream.
    ///
    /// Called once by the manager before it starts; events emitted before
    /// this call are not delivered.
    fn events(&self) -> impl Future<Output = Result<mpsc::Receiver<AdapterEvent>>> + Send;

    /// Current adapter state.
    fn adapter_state(&self) -> impl Future<Output = Result<AdapterState>> + Send;

    /// Start an unfiltered scan.
    fn start_scan(&self) -> impl Future<Output = Result<()>> + Send;

    /// Stop scanning.
    fn stop_scan(&self) -> impl Future<Output = Result<()>> + Send;

    /// Connect to a discovered peripheral.
    fn connect(&self, address: &str) -> impl Future<Output = Result<()>> + Send;

    /// Disconnect from a peripheral. Succeeds if it is already disconnected.
    fn disconnect(&self, address: &str) -> impl Future<Output = Result<()>> + Send;

    /// Enumerate every service of a connected peripheral.
    fn discover_services(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<Vec<GattService>>> + Send;

    /// Enumerate every characteristic of one service.
    fn discover_characteristics(
        &self,
        address: &str,
        service: &GattService,
    ) -> impl Future<Output = Result<Vec<GattCharacteristicRef>>> + Send;

    /// Read a characteristic value.
    fn read_value(
        &self,
        address: &str,
        characteristic: &GattCharacteristicRef,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Write a characteristic value.
    fn write_value(
        &self,
        address: &str,
        characteristic: &GattCharacteristicRef,
        value: &[u8],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Enable notifications for a characteristic.
    fn subscribe(
        &self,
        address: &str,
        characteristic: &GattCharacteristicRef,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Disable notifications for a characteristic.
    fn unsubscribe(
        &self,
        address: &str,
        characteristic: &GattCharacteristicRef,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Open the notification stream of a connected peripheral.
    ///
    /// There is one stream per connection. It ends when the link goes down;
    /// a new connection needs a new stream.
    fn notifications(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<mpsc::Receiver<Notification>>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_state_classification() {
        assert!(AdapterState::PoweredOn.is_usable());
        assert!(!AdapterState::Unknown.is_usable());
        assert!(!AdapterState::Unknown.is_terminal());

        for state in [
            AdapterState::PoweredOff,
            AdapterState::Unauthorized,
            AdapterState::Unsupported,
        ] {
            assert!(state.is_terminal(), "{state}");
            assert!(!state.is_usable(), "{state}");
        }
    }

    #[test]
    fn test_notification_new() {
        let uuid = GattUuid::from_short(0xffe1);
        let notification = Notification::new(uuid, vec![0x55, 0xAA]);
        assert_eq!(notification.characteristic, uuid);
        assert_eq!(&notification.value[..], &[0x55, 0xAA]);
    }
}
