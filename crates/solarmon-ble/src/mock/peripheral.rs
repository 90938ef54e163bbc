//! Scripted peripheral model for the mock adapter.

use solarmon_core::config::GattConfig;
use solarmon_core::{
    CharacteristicProperties, DiscoveredPeripheral, GattCharacteristicRef, GattService, GattUuid,
};
use std::collections::{HashMap, HashSet};

/// Vendor service carrying the BMS data characteristic.
const BMS_SERVICE: u32 = 0xffe0;

/// Standard Battery Service.
const BATTERY_SERVICE: u32 = 0x180f;

/// GATT layout and values of a simulated peripheral.
///
/// # Examples
///
/// ```
/// use solarmon_ble::mock::MockPeripheral;
/// use solarmon_core::DiscoveredPeripheral;
///
/// let info = DiscoveredPeripheral::new("c8:47:80:12:9b:46")
///     .with_local_name("Andrii 1")
///     .with_rssi(-55);
/// let peripheral = MockPeripheral::bms(info).with_battery_level(87);
/// assert_eq!(peripheral.characteristics().count(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct MockPeripheral {
    info: DiscoveredPeripheral,
    services: Vec<(GattService, Vec<GattCharacteristicRef>)>,
    values: HashMap<GattUuid, Vec<u8>>,
    failing_reads: HashSet<GattUuid>,
    failing_subscribes: HashSet<GattUuid>,
}

impl MockPeripheral {
    /// A peripheral with no services.
    pub fn new(info: DiscoveredPeripheral) -> Self {
        Self {
            info,
            services: Vec::new(),
            values: HashMap::new(),
            failing_reads: HashSet::new(),
            failing_subscribes: HashSet::new(),
        }
    }

    /// A BMS exposing the `ffe0` service with the `ffe1` data characteristic
    /// (notify, write).
    pub fn bms(info: DiscoveredPeripheral) -> Self {
        let data = CharacteristicProperties {
            notify: true,
            write: true,
            write_without_response: true,
            ..CharacteristicProperties::default()
        };
        Self::new(info).with_service(
            GattUuid::from_short(BMS_SERVICE),
            [(GattConfig::default().data_characteristic, data)],
        )
    }

    /// Add a primary service with its characteristics.
    pub fn with_service(
        mut self,
        service_uuid: GattUuid,
        characteristics: impl IntoIterator<Item = (GattUuid, CharacteristicProperties)>,
    ) -> Self {
        let service = GattService {
            uuid: service_uuid,
            primary: true,
        };
        let characteristics = characteristics
            .into_iter()
            .enumerate()
            .map(|(i, (uuid, properties))| GattCharacteristicRef {
                service_uuid,
                characteristic_uuid: uuid,
                properties,
                handle: u16::try_from(i + 1).ok(),
            })
            .collect();
        self.services.push((service, characteristics));
        self
    }

    /// Add the Battery Service with a readable, notifying level.
    pub fn with_battery_level(self, level: u8) -> Self {
        let properties = CharacteristicProperties {
            read: true,
            notify: true,
            ..CharacteristicProperties::default()
        };
        let uuid = GattConfig::default().battery_level_characteristic;
        self.with_service(GattUuid::from_short(BATTERY_SERVICE), [(uuid, properties)])
            .with_value(uuid, vec![level])
    }

    /// Set the value returned by reads of a characteristic.
    pub fn with_value(mut self, uuid: GattUuid, value: Vec<u8>) -> Self {
        self.values.insert(uuid, value);
        self
    }

    /// Make reads of a characteristic fail.
    pub fn with_failing_read(mut self, uuid: GattUuid) -> Self {
        self.failing_reads.insert(uuid);
        self
    }

    /// Make subscribing to a characteristic fail.
    pub fn with_failing_subscribe(mut self, uuid: GattUuid) -> Self {
        self.failing_subscribes.insert(uuid);
        self
    }

    /// Advertisement snapshot.
    pub fn info(&self) -> &DiscoveredPeripheral {
        &self.info
    }

    /// Hardware address.
    pub fn address(&self) -> &str {
        &self.info.address
    }

    /// All characteristics across services.
    pub fn characteristics(&self) -> impl Iterator<Item = &GattCharacteristicRef> {
        self.services.iter().flat_map(|(_, chars)| chars.iter())
    }

    pub(crate) fn services(&self) -> impl Iterator<Item = &GattService> {
        self.services.iter().map(|(service, _)| service)
    }

    pub(crate) fn characteristics_of(&self, service: &GattUuid) -> Option<&[GattCharacteristicRef]> {
        self.services
            .iter()
            .find(|(s, _)| &s.uuid == service)
            .map(|(_, chars)| chars.as_slice())
    }

    pub(crate) fn value(&self, uuid: &GattUuid) -> Option<&[u8]> {
        self.values.get(uuid).map(Vec::as_slice)
    }

    pub(crate) fn read_fails(&self, uuid: &GattUuid) -> bool {
        self.failing_reads.contains(uuid)
    }

    pub(crate) fn subscribe_fails(&self, uuid: &GattUuid) -> bool {
        self.failing_subscribes.contains(uuid)
    }
}
