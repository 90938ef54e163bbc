use crate::{
    Result,
    constants::{RSSI_MEDIUM, RSSI_STRONG},
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Permitted device entry from the allow list.
///
/// At least one of the two keys must be present. Addresses compare
/// case-insensitively, local names exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllowedDevice {
    /// Advertised local name.
    #[serde(default)]
    pub local_name: Option<String>,

    /// Hardware address (`c8:47:80:12:9b:46`).
    #[serde(default)]
    pub address: Option<String>,
}

impl AllowedDevice {
    /// Create an entry matching by local name.
    pub fn by_name(local_name: impl Into<String>) -> Self {
        Self {
            local_name: Some(local_name.into()),
            address: None,
        }
    }

    /// Create an entry matching by hardware address.
    pub fn by_address(address: impl Into<String>) -> Self {
        Self {
            local_name: None,
            address: Some(address.into()),
        }
    }

    /// Check that at least one non-empty key is present.
    ///
    /// # Errors
    /// Returns `Error::InvalidAllowedDevice` if both keys are absent or blank.
    pub fn validate(&self) -> Result<()> {
        let has_name = self.local_name.as_deref().is_some_and(|n| !n.trim().is_empty());
        let has_address = self.address.as_deref().is_some_and(|a| !a.trim().is_empty());
        if !has_name && !has_address {
            return Err(Error::InvalidAllowedDevice(
                "entry needs a local_name or an address".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns `true` if the discovered peripheral matches this entry.
    #[must_use]
    pub fn matches(&self, peripheral: &DiscoveredPeripheral) -> bool {
        let name_match = match (&self.local_name, &peripheral.local_name) {
            (Some(wanted), Some(seen)) => wanted == seen,
            _ => false,
        };
        let address_match = match &self.address {
            Some(wanted) => !peripheral.address.is_empty() && addresses_equal(wanted, &peripheral.address),
            None => false,
        };
        name_match || address_match
    }

    /// Returns `true` if the key (name, address or device id) matches this entry.
    #[must_use]
    pub fn matches_key(&self, key: &str) -> bool {
        self.local_name.as_deref() == Some(key)
            || self.address.as_deref().is_some_and(|a| addresses_equal(a, key))
    }
}

impl fmt::Display for AllowedDevice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (&self.local_name, &self.address) {
            (Some(name), Some(address)) => write!(f, "{name} [{address}]"),
            (Some(name), None) => write!(f, "{name}"),
            (None, Some(address)) => write!(f, "[{address}]"),
            (None, None) => write!(f, "<empty>"),
        }
    }
}

/// Compare two hardware addresses ignoring case and surrounding whitespace.
#[must_use]
pub fn addresses_equal(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Link-level connection state reported by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// Ephemeral peripheral snapshot taken from a discovery event.
///
/// The adapter owns the real handle; the core keeps this snapshot and refers
/// to the peripheral by its `address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPeripheral {
    /// Hardware address (stable across sessions).
    pub address: String,

    /// Advertised local name.
    pub local_name: Option<String>,

    /// Signal strength in dBm.
    pub rssi: Option<i16>,

    /// Raw manufacturer data from the advertisement.
    pub manufacturer_data: Option<Vec<u8>>,

    /// Link state at the time of the snapshot.
    pub connection_state: ConnectionState,
}

impl DiscoveredPeripheral {
    /// Create a snapshot with only an address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            local_name: None,
            rssi: None,
            manufacturer_data: None,
            connection_state: ConnectionState::Disconnected,
        }
    }

    /// Set the advertised local name.
    #[must_use]
    pub fn with_local_name(mut self, local_name: impl Into<String>) -> Self {
        self.local_name = Some(local_name.into());
        self
    }

    /// Set the RSSI.
    #[must_use]
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Set the manufacturer data.
    #[must_use]
    pub fn with_manufacturer_data(mut self, data: Vec<u8>) -> Self {
        self.manufacturer_data = Some(data);
        self
    }

    /// Signal tier for the advertised RSSI, if any.
    #[must_use]
    pub fn signal_strength(&self) -> Option<SignalStrength> {
        self.rssi.map(SignalStrength::from_rssi)
    }
}

/// Canonical identity of a tracked peripheral.
///
/// Resolved once per discovery by [`DeviceId::resolve`] and used as the
/// registry key for the lifetime of the tracking entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a device ID from a raw key.
    ///
    /// # Errors
    /// Returns `Error::InvalidAllowedDevice` if the key is empty.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::InvalidAllowedDevice(
                "device id must not be empty".to_string(),
            ));
        }
        Ok(DeviceId(id))
    }

    /// Resolve the identity of a discovered peripheral.
    ///
    /// Precedence: local name, then address, then manufacturer data as
    /// lowercase hex. Returns `None` when the advertisement carries none.
    ///
    /// # Examples
    ///
    /// ```
    /// use solarmon_core::{DeviceId, DiscoveredPeripheral};
    ///
    /// let named = DiscoveredPeripheral::new("c8:47:80:12:9b:46").with_local_name("Andrii 1");
    /// assert_eq!(DeviceId::resolve(&named).unwrap().as_str(), "Andrii 1");
    ///
    /// let anonymous = DiscoveredPeripheral::new("c8:47:80:12:9b:46");
    /// assert_eq!(DeviceId::resolve(&anonymous).unwrap().as_str(), "c8:47:80:12:9b:46");
    /// ```
    #[must_use]
    pub fn resolve(peripheral: &DiscoveredPeripheral) -> Option<Self> {
        if let Some(name) = peripheral.local_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return Some(DeviceId(name.to_string()));
        }
        if !peripheral.address.trim().is_empty() {
            return Some(DeviceId(peripheral.address.clone()));
        }
        peripheral
            .manufacturer_data
            .as_deref()
            .filter(|data| !data.is_empty())
            .map(|data| DeviceId(to_hex(data)))
    }

    /// Get the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DeviceId::new(s)
    }
}

fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

/// Coarse signal tier derived from RSSI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStrength {
    Strong,
    Medium,
    Weak,
}

impl SignalStrength {
    /// Classify an RSSI value in dBm.
    #[inline]
    #[must_use]
    pub fn from_rssi(rssi: i16) -> Self {
        if rssi >= RSSI_STRONG {
            SignalStrength::Strong
        } else if rssi >= RSSI_MEDIUM {
            SignalStrength::Medium
        } else {
            SignalStrength::Weak
        }
    }
}

impl fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SignalStrength::Strong => write!(f, "strong"),
            SignalStrength::Medium => write!(f, "medium"),
            SignalStrength::Weak => write!(f, "weak"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_device_id_prefers_local_name() {
        let peripheral = DiscoveredPeripheral::new("C8:47:80:12:9B:46")
            .with_local_name("Andrii 1")
            .with_manufacturer_data(vec![0x65, 0x0b]);
        assert_eq!(DeviceId::resolve(&peripheral).unwrap().as_str(), "Andrii 1");
    }

    #[test]
    fn test_device_id_blank_name_falls_back_to_address() {
        let peripheral = DiscoveredPeripheral::new("C8:47:80:12:9B:46").with_local_name("  ");
        assert_eq!(
            DeviceId::resolve(&peripheral).unwrap().as_str(),
            "C8:47:80:12:9B:46"
        );
    }

    #[test]
    fn test_device_id_falls_back_to_manufacturer_hex() {
        let peripheral =
            DiscoveredPeripheral::new("").with_manufacturer_data(vec![0x65, 0x0b, 0x88, 0xa0]);
        assert_eq!(DeviceId::resolve(&peripheral).unwrap().as_str(), "650b88a0");
    }

    #[test]
    fn test_device_id_unresolvable() {
        let peripheral = DiscoveredPeripheral::new("");
        assert!(DeviceId::resolve(&peripheral).is_none());
    }

    #[test]
    fn test_device_id_rejects_empty() {
        assert!(DeviceId::new("").is_err());
        assert!("Andrii 2".parse::<DeviceId>().is_ok());
    }

    #[rstest]
    #[case(-40, SignalStrength::Strong)]
    #[case(-60, SignalStrength::Strong)]
    #[case(-61, SignalStrength::Medium)]
    #[case(-80, SignalStrength::Medium)]
    #[case(-81, SignalStrength::Weak)]
    #[case(-110, SignalStrength::Weak)]
    fn test_signal_strength_tiers(#[case] rssi: i16, #[case] expected: SignalStrength) {
        assert_eq!(SignalStrength::from_rssi(rssi), expected);
    }

    #[test]
    fn test_allowed_device_validation() {
        assert!(AllowedDevice::by_name("Andrii 1").validate().is_ok());
        assert!(AllowedDevice::by_address("c8:47:80:12:9b:46").validate().is_ok());

        let empty = AllowedDevice {
            local_name: Some(" ".to_string()),
            address: None,
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_allowed_device_address_is_case_insensitive() {
        let entry = AllowedDevice::by_address("c8:47:80:12:9b:46");
        let peripheral = DiscoveredPeripheral::new("C8:47:80:12:9B:46");
        assert!(entry.matches(&peripheral));
    }

    #[test]
    fn test_allowed_device_name_is_exact() {
        let entry = AllowedDevice::by_name("Andrii 1");
        let peripheral = DiscoveredPeripheral::new("aa:bb:cc:dd:ee:ff").with_local_name("andrii 1");
        assert!(!entry.matches(&peripheral));
    }

    #[test]
    fn test_allowed_device_display() {
        let both = AllowedDevice {
            local_name: Some("Andrii 1".to_string()),
            address: Some("c8:47:80:12:9b:46".to_string()),
        };
        assert_eq!(both.to_string(), "Andrii 1 [c8:47:80:12:9b:46]");
    }
}
