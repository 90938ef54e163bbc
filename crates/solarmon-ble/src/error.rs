//! Error types for BLE operations.
//!
//! This module defines the failure taxonomy of the connection layer. Every
//! per-device error is caught at the connection lifecycle boundary and turned
//! into a state transition; none of them reaches the manager event loop.

use crate::adapter::AdapterState;

/// Result type alias for BLE operations.
pub type Result<T> = std::result::Result<T, BleError>;

/// Errors that can occur while talking to the adapter or a peripheral.
#[derive(Debug, thiserror::Error)]
pub enum BleError {
    /// The adapter is powered off, unauthorized or unsupported.
    #[error("Adapter unavailable: {state}")]
    AdapterUnavailable { state: AdapterState },

    /// Connect request was rejected or timed out.
    #[error("Connect failed for {address}: {message}")]
    ConnectFailure { address: String, message: String },

    /// Service or characteristic enumeration failed.
    #[error("Service discovery failed for {address}: {message}")]
    ServiceDiscoveryFailure { address: String, message: String },

    /// Subscribing to a characteristic failed.
    #[error("Subscribe to {characteristic} failed: {message}")]
    SubscribeFailure {
        characteristic: String,
        message: String,
    },

    /// A required characteristic is not exposed by the peripheral.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound { uuid: String },

    /// The adapter does not know a peripheral with this address.
    #[error("Unknown peripheral: {address}")]
    UnknownPeripheral { address: String },

    /// Peripheral is not connected or has been disconnected.
    #[error("Device disconnected: {address}")]
    Disconnected { address: String },

    /// Error reported by the host BLE stack.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Frame or configuration error from the core crates.
    #[error("Protocol error: {0}")]
    Protocol(#[from] solarmon_core::Error),
}

impl BleError {
    /// Create a new adapter unavailable error.
    pub fn adapter_unavailable(state: AdapterState) -> Self {
        Self::AdapterUnavailable { state }
    }

    /// Create a new connect failure.
    pub fn connect_failure(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectFailure {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Create a new service discovery failure.
    pub fn service_discovery(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ServiceDiscoveryFailure {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Create a new subscribe failure.
    pub fn subscribe(characteristic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SubscribeFailure {
            characteristic: characteristic.into(),
            message: message.into(),
        }
    }

    /// Create a new characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>) -> Self {
        Self::CharacteristicNotFound { uuid: uuid.into() }
    }

    /// Create a new unknown peripheral error.
    pub fn unknown_peripheral(address: impl Into<String>) -> Self {
        Self::UnknownPeripheral {
            address: address.into(),
        }
    }

    /// Create a new disconnected error.
    pub fn disconnected(address: impl Into<String>) -> Self {
        Self::Disconnected {
            address: address.into(),
        }
    }

    /// Create a new backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Whether another connection attempt may succeed.
    ///
    /// Connect, discovery and subscribe failures are transient radio
    /// conditions. An unusable adapter, an unknown peripheral or a protocol
    /// error will not change by retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailure { .. }
                | Self::ServiceDiscoveryFailure { .. }
                | Self::SubscribeFailure { .. }
                | Self::CharacteristicNotFound { .. }
                | Self::Disconnected { .. }
                | Self::Backend(_)
        )
    }
}
