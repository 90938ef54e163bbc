//! Static allow list of permitted peripherals.
//!
//! The allow list is loaded once at startup and never mutated. Lookups are
//! pure: a peripheral is allowed when its local name or its hardware address
//! matches exactly one configured [`AllowedDevice`]. Construction rejects
//! entries that share a key, but an advertisement can still carry the name
//! of one entry and the address of another; such a peripheral is refused.
//!
//! # Examples
//!
//! ```
//! use solarmon_core::{AllowList, AllowedDevice, DiscoveredPeripheral};
//!
//! let allow = AllowList::new(vec![AllowedDevice::by_name("Andrii 1")]).unwrap();
//!
//! let seen = DiscoveredPeripheral::new("c8:47:80:12:9b:46").with_local_name("Andrii 1");
//! assert!(allow.is_allowed(&seen));
//! assert!(allow.is_allowed_key("Andrii 1"));
//! assert!(!allow.is_allowed_key("Andrii 9"));
//! ```

use crate::{AllowedDevice, DiscoveredPeripheral, Error, Result, types::addresses_equal};

/// Immutable set of permitted devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    entries: Vec<AllowedDevice>,
}

impl AllowList {
    /// Build an allow list, validating every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The list is empty
    /// - An entry has neither a local name nor an address
    /// - Two entries share a local name or an address
    pub fn new(entries: Vec<AllowedDevice>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::MissingConfig("allowed_devices".to_string()));
        }

        for (index, entry) in entries.iter().enumerate() {
            entry.validate()?;

            for other in &entries[..index] {
                if let (Some(a), Some(b)) = (&entry.local_name, &other.local_name)
                    && a == b
                {
                    return Err(Error::DuplicateAllowedDevice(a.clone()));
                }
                if let (Some(a), Some(b)) = (&entry.address, &other.address)
                    && addresses_equal(a, b)
                {
                    return Err(Error::DuplicateAllowedDevice(a.clone()));
                }
            }
        }

        Ok(Self { entries })
    }

    /// Returns `true` if the peripheral matches exactly one configured entry.
    #[must_use]
    pub fn is_allowed(&self, peripheral: &DiscoveredPeripheral) -> bool {
        self.find(peripheral).is_some()
    }

    /// Returns `true` if a device id, local name or address matches an entry.
    #[must_use]
    pub fn is_allowed_key(&self, key: &str) -> bool {
        self.entries.iter().any(|entry| entry.matches_key(key))
    }

    /// Find the entry a peripheral matches.
    ///
    /// Returns `None` when nothing matches or when the name and the address
    /// point at different entries.
    #[must_use]
    pub fn find(&self, peripheral: &DiscoveredPeripheral) -> Option<&AllowedDevice> {
        let mut matching = self.entries.iter().filter(|entry| entry.matches(peripheral));
        let entry = matching.next()?;
        matching.next().is_none().then_some(entry)
    }

    /// Configured entries.
    #[must_use]
    pub fn entries(&self) -> &[AllowedDevice] {
        &self.entries
    }

    /// Number of configured entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false` for a constructed list; kept for API symmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
