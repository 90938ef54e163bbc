//! `btleplug` implementation of [`BleAdapter`].
//!
//! Peripheral handles are cached by address when first seen so later
//! operations can refer to a device by its address alone.

use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, PeripheralProperties, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::StreamExt;
use solarmon_core::{
    CharacteristicProperties, DiscoveredPeripheral, GattCharacteristicRef, GattService, GattUuid,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::adapter::{AdapterEvent, AdapterState, BleAdapter, Notification};
use crate::error::{BleError, Result};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

type PeripheralCache = Arc<Mutex<HashMap<String, Peripheral>>>;

fn lock(cache: &PeripheralCache) -> MutexGuard<'_, HashMap<String, Peripheral>> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

fn backend(e: btleplug::Error) -> BleError {
    BleError::backend(e.to_string())
}

/// BLE adapter backed by the host Bluetooth stack.
#[derive(Debug, Clone)]
pub struct BtleplugAdapter {
    adapter: Adapter,
    peripherals: PeripheralCache,
}

impl BtleplugAdapter {
    /// Open the first Bluetooth adapter of the host.
    ///
    /// # Errors
    ///
    /// Returns `BleError::Backend` if the Bluetooth stack is unavailable or
    /// the host has no adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await.map_err(backend)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(backend)?
            .into_iter()
            .next()
            .ok_or_else(|| BleError::backend("no Bluetooth adapter found"))?;

        match adapter.adapter_info().await {
            Ok(name) => info!("Using Bluetooth adapter {}", name),
            Err(e) => debug!("Adapter info unavailable: {}", e),
        }

        Ok(Self {
            adapter,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn peripheral(&self, address: &str) -> Result<Peripheral> {
        lock(&self.peripherals)
            .get(&address.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| BleError::unknown_peripheral(address))
    }

    fn characteristic(
        peripheral: &Peripheral,
        characteristic: &GattCharacteristicRef,
    ) -> Result<Characteristic> {
        let uuid = characteristic.characteristic_uuid.as_uuid();
        let service_uuid = characteristic.service_uuid.as_uuid();
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid && c.service_uuid == service_uuid)
            .ok_or_else(|| BleError::characteristic_not_found(characteristic.to_string()))
    }
}

impl From<CentralState> for AdapterState {
    fn from(state: CentralState) -> Self {
        match state {
            CentralState::PoweredOn => AdapterState::PoweredOn,
            CentralState::PoweredOff => AdapterState::PoweredOff,
            CentralState::Unknown => AdapterState::Unknown,
        }
    }
}

fn properties_of(flags: CharPropFlags) -> CharacteristicProperties {
    CharacteristicProperties {
        read: flags.contains(CharPropFlags::READ),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
        indicate: flags.contains(CharPropFlags::INDICATE),
    }
}

fn characteristic_ref(characteristic: &Characteristic) -> GattCharacteristicRef {
    GattCharacteristicRef {
        service_uuid: GattUuid::from_uuid(characteristic.service_uuid),
        characteristic_uuid: GattUuid::from_uuid(characteristic.uuid),
        properties: properties_of(characteristic.properties),
        handle: None,
    }
}

/// Flatten manufacturer data as company id (little endian) followed by the
/// payload of the lowest company id.
fn manufacturer_data(properties: &PeripheralProperties) -> Option<Vec<u8>> {
    let (company, payload) = properties.manufacturer_data.iter().min_by_key(|(id, _)| **id)?;
    let mut data = company.to_le_bytes().to_vec();
    data.extend_from_slice(payload);
    Some(data)
}

async fn discovered(
    adapter: &Adapter,
    cache: &PeripheralCache,
    id: &PeripheralId,
) -> Option<DiscoveredPeripheral> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok().flatten()?;
    let address = peripheral.address().to_string();

    lock(cache).insert(address.to_ascii_lowercase(), peripheral);

    let mut info = DiscoveredPeripheral::new(address);
    info.local_name = properties.local_name.clone();
    info.rssi = properties.rssi;
    info.manufacturer_data = manufacturer_data(&properties);
    Some(info)
}

async fn address_of(adapter: &Adapter, id: &PeripheralId) -> Option<String> {
    adapter
        .peripheral(id)
        .await
        .ok()
        .map(|p| p.address().to_string())
}

impl BleAdapter for BtleplugAdapter {
    async fn events(&self) -> Result<mpsc::Receiver<AdapterEvent>> {
        let mut stream = self.adapter.events().await.map_err(backend)?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let adapter = self.adapter.clone();
        let cache = Arc::clone(&self.peripherals);

        tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let mapped = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        discovered(&adapter, &cache, &id)
                            .await
                            .map(AdapterEvent::Discovered)
                    }
                    CentralEvent::DeviceConnected(id) => {
                        address_of(&adapter, &id).await.map(AdapterEvent::Connected)
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        address_of(&adapter, &id).await.map(AdapterEvent::Disconnected)
                    }
                    CentralEvent::StateUpdate(state) => {
                        Some(AdapterEvent::StateChanged(state.into()))
                    }
                    _ => None,
                };

                if let Some(event) = mapped
                    && tx.send(event).await.is_err()
                {
                    break;
                }
            }
            debug!("Adapter event stream ended");
        });

        Ok(rx)
    }

    async fn adapter_state(&self) -> Result<AdapterState> {
        self.adapter
            .adapter_state()
            .await
            .map(AdapterState::from)
            .map_err(backend)
    }

    async fn start_scan(&self) -> Result<()> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(backend)
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await.map_err(backend)
    }

    async fn connect(&self, address: &str) -> Result<()> {
        let peripheral = self.peripheral(address)?;
        peripheral
            .connect()
            .await
            .map_err(|e| BleError::connect_failure(address, e.to_string()))
    }

    async fn disconnect(&self, address: &str) -> Result<()> {
        let peripheral = self.peripheral(address)?;
        if peripheral.is_connected().await.map_err(backend)? {
            peripheral.disconnect().await.map_err(backend)?;
        }
        Ok(())
    }

    async fn discover_services(&self, address: &str) -> Result<Vec<GattService>> {
        let peripheral = self.peripheral(address)?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| BleError::service_discovery(address, e.to_string()))?;

        Ok(peripheral
            .services()
            .into_iter()
            .map(|service| GattService {
                uuid: GattUuid::from_uuid(service.uuid),
                primary: service.primary,
            })
            .collect())
    }

    async fn discover_characteristics(
        &self,
        address: &str,
        service: &GattService,
    ) -> Result<Vec<GattCharacteristicRef>> {
        let peripheral = self.peripheral(address)?;
        let uuid = service.uuid.as_uuid();
        peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == uuid)
            .map(|s| s.characteristics.iter().map(characteristic_ref).collect())
            .ok_or_else(|| BleError::service_discovery(address, format!("no service {}", service.uuid)))
    }

    async fn read_value(
        &self,
        address: &str,
        characteristic: &GattCharacteristicRef,
    ) -> Result<Vec<u8>> {
        let peripheral = self.peripheral(address)?;
        let target = Self::characteristic(&peripheral, characteristic)?;
        peripheral.read(&target).await.map_err(backend)
    }

    async fn write_value(
        &self,
        address: &str,
        characteristic: &GattCharacteristicRef,
        value: &[u8],
    ) -> Result<()> {
        let peripheral = self.peripheral(address)?;
        let target = Self::characteristic(&peripheral, characteristic)?;
        let write_type = if characteristic.properties.write {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        peripheral
            .write(&target, value, write_type)
            .await
            .map_err(backend)
    }

    async fn subscribe(&self, address: &str, characteristic: &GattCharacteristicRef) -> Result<()> {
        let peripheral = self.peripheral(address)?;
        let target = Self::characteristic(&peripheral, characteristic)?;
        peripheral
            .subscribe(&target)
            .await
            .map_err(|e| BleError::subscribe(characteristic.to_string(), e.to_string()))
    }

    async fn unsubscribe(
        &self,
        address: &str,
        characteristic: &GattCharacteristicRef,
    ) -> Result<()> {
        let peripheral = self.peripheral(address)?;
        let target = Self::characteristic(&peripheral, characteristic)?;
        peripheral.unsubscribe(&target).await.map_err(backend)
    }

    async fn notifications(&self, address: &str) -> Result<mpsc::Receiver<Notification>> {
        let peripheral = self.peripheral(address)?;
        let mut stream = peripheral.notifications().await.map_err(backend)?;
        let (tx, rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                trace!(
                    "Notification from {}: {} bytes",
                    notification.uuid,
                    notification.value.len()
                );
                let value = Notification::new(
                    GattUuid::from_uuid(notification.uuid),
                    Bytes::from(notification.value),
                );
                if tx.send(value).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}
