//! GATT identifiers and characteristic snapshots.
//!
//! Adapters report UUIDs in different shapes: BlueZ hands out full 128-bit
//! strings, other stacks report the 16-bit short form, and configuration files
//! contain whatever the user typed. [`GattUuid`] normalizes all of them onto
//! the 128-bit form so comparisons are case- and length-insensitive.
//!
//! ```
//! use solarmon_core::GattUuid;
//!
//! let short: GattUuid = "FFE1".parse().unwrap();
//! let long: GattUuid = "0000ffe1-0000-1000-8000-00805f9b34fb".parse().unwrap();
//! assert_eq!(short, long);
//! assert_eq!(short.short_form(), Some(0xffe1));
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Bluetooth base UUID (`00000000-0000-1000-8000-00805f9b34fb`).
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Mask of the bits a short-form UUID leaves untouched.
const BASE_MASK: u128 = 0x0000_0000_ffff_ffff_ffff_ffff_ffff_ffff;

/// Normalized GATT UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GattUuid(Uuid);

impl GattUuid {
    /// Wrap a full 128-bit UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Expand a 16- or 32-bit short form onto the Bluetooth base UUID.
    #[must_use]
    pub const fn from_short(short: u32) -> Self {
        Self(Uuid::from_u128(BASE_UUID | ((short as u128) << 96)))
    }

    /// Parse any of the accepted textual forms.
    ///
    /// Accepts 4 or 8 hex digits (short forms, optional `0x` prefix) and
    /// 32 hex digits with or without hyphens. Case is ignored.
    ///
    /// # Errors
    /// Returns `Error::InvalidUuid` if the text is not a UUID.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        match digits.len() {
            4 | 8 => u32::from_str_radix(digits, 16)
                .map(Self::from_short)
                .map_err(|_| Error::InvalidUuid(text.to_string())),
            _ => Uuid::parse_str(digits)
                .map(Self)
                .map_err(|_| Error::InvalidUuid(text.to_string())),
        }
    }

    /// The underlying 128-bit UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// The 32-bit short form, if this UUID lives on the Bluetooth base.
    #[must_use]
    pub fn short_form(&self) -> Option<u32> {
        let value = self.0.as_u128();
        if value & BASE_MASK == BASE_UUID {
            Some((value >> 96) as u32)
        } else {
            None
        }
    }
}

impl From<Uuid> for GattUuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::str::FromStr for GattUuid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        GattUuid::parse(s)
    }
}

impl fmt::Display for GattUuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl Serialize for GattUuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GattUuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        GattUuid::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Characteristic capabilities relevant to the connection lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    /// Returns `true` if value updates can be subscribed to.
    #[must_use]
    pub fn can_subscribe(&self) -> bool {
        self.notify || self.indicate
    }

    /// Returns `true` if the characteristic accepts writes of any kind.
    #[must_use]
    pub fn can_write(&self) -> bool {
        self.write || self.write_without_response
    }
}

/// Primary service reported by service discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GattService {
    pub uuid: GattUuid,
    pub primary: bool,
}

/// Read-only characteristic snapshot from service discovery.
///
/// Re-fetched on every connection: adapter handles are not stable across
/// sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GattCharacteristicRef {
    pub service_uuid: GattUuid,
    pub characteristic_uuid: GattUuid,
    pub properties: CharacteristicProperties,
    /// Attribute handle, when the adapter exposes one.
    pub handle: Option<u16>,
}

impl GattCharacteristicRef {
    /// Returns `true` if this characteristic has the given UUID.
    #[must_use]
    pub fn is(&self, uuid: &GattUuid) -> bool {
        &self.characteristic_uuid == uuid
    }
}

impl fmt::Display for GattCharacteristicRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.service_uuid, self.characteristic_uuid)
    }
}
