//! Mock BLE adapter for testing and development.
//!
//! This module provides a simulated adapter that can be scripted
//! programmatically, so the whole connection lifecycle runs without a radio.

use bytes::Bytes;
use solarmon_core::{DiscoveredPeripheral, GattCharacteristicRef, GattService, GattUuid};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use super::MockPeripheral;
use crate::adapter::{AdapterEvent, AdapterState, BleAdapter, Notification};
use crate::error::{BleError, Result};

/// Capacity of the adapter event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Capacity of each per-connection notification channel.
const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// One characteristic write observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// Peripheral address.
    pub address: String,

    /// Characteristic written.
    pub characteristic: GattUuid,

    /// Bytes written.
    pub value: Vec<u8>,
}

#[derive(Debug)]
struct PeripheralState {
    model: MockPeripheral,
    connected: bool,
    reachable: bool,
    fail_connects: u32,
    connect_attempts: u32,
    subscribed: HashSet<GattUuid>,
    unsubscribes: usize,
    notify_tx: Option<mpsc::Sender<Notification>>,
}

impl PeripheralState {
    fn new(model: MockPeripheral) -> Self {
        Self {
            model,
            connected: false,
            reachable: true,
            fail_connects: 0,
            connect_attempts: 0,
            subscribed: HashSet::new(),
            unsubscribes: 0,
            notify_tx: None,
        }
    }

    fn drop_link(&mut self) {
        self.connected = false;
        self.subscribed.clear();
        self.notify_tx = None;
    }
}

#[derive(Debug)]
struct Shared {
    adapter_state: AdapterState,
    events_tx: Option<mpsc::Sender<AdapterEvent>>,
    peripherals: HashMap<String, PeripheralState>,
    scanning: bool,
    scan_starts: usize,
    scan_stops: usize,
    fail_next_scan_start: bool,
    writes: Vec<WriteRecord>,
}

type SharedState = Arc<Mutex<Shared>>;

fn lock(shared: &SharedState) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock BLE adapter for testing and development.
///
/// Peripherals are registered and driven through the paired
/// [`MockAdapterHandle`]; the adapter side implements [`BleAdapter`] and is
/// handed to the [`DeviceManager`](crate::DeviceManager).
///
/// # Examples
///
/// ```
/// use solarmon_ble::adapter::{AdapterEvent, BleAdapter};
/// use solarmon_ble::mock::{MockAdapter, MockPeripheral};
/// use solarmon_core::DiscoveredPeripheral;
///
/// #[tokio::main]
/// async fn main() -> solarmon_ble::Result<()> {
///     let (adapter, handle) = MockAdapter::new();
///     let info = DiscoveredPeripheral::new("c8:47:80:12:9b:46").with_local_name("Andrii 1");
///     handle.add_peripheral(MockPeripheral::bms(info));
///
///     let mut events = adapter.events().await?;
///     handle.discover("c8:47:80:12:9b:46").await?;
///
///     let event = events.recv().await.unwrap();
///     assert!(matches!(event, AdapterEvent::Discovered(_)));
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockAdapter {
    shared: SharedState,
}

impl MockAdapter {
    /// Create a new mock adapter in the [`AdapterState::Unknown`] state.
    ///
    /// Returns a tuple of (MockAdapter, MockAdapterHandle) where the handle
    /// scripts peripherals and adapter events.
    pub fn new() -> (Self, MockAdapterHandle) {
        let shared = Arc::new(Mutex::new(Shared {
            adapter_state: AdapterState::Unknown,
            events_tx: None,
            peripherals: HashMap::new(),
            scanning: false,
            scan_starts: 0,
            scan_stops: 0,
            fail_next_scan_start: false,
            writes: Vec::new(),
        }));

        let adapter = Self {
            shared: Arc::clone(&shared),
        };
        (adapter, MockAdapterHandle { shared })
    }

    fn with_connected<T>(
        &self,
        address: &str,
        f: impl FnOnce(&mut PeripheralState) -> Result<T>,
    ) -> Result<T> {
        let mut shared = lock(&self.shared);
        let peripheral = shared
            .peripherals
            .get_mut(address)
            .ok_or_else(|| BleError::unknown_peripheral(address))?;
        if !peripheral.connected {
            return Err(BleError::disconnected(address));
        }
        f(peripheral)
    }

    fn emit(&self, event: AdapterEvent) {
        let tx = lock(&self.shared).events_tx.clone();
        if let Some(tx) = tx {
            let _ = tx.try_send(event);
        }
    }
}

impl BleAdapter for MockAdapter {
    async fn events(&self) -> Result<mpsc::Receiver<AdapterEvent>> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        lock(&self.shared).events_tx = Some(tx);
        Ok(rx)
    }

    async fn adapter_state(&self) -> Result<AdapterState> {
        Ok(lock(&self.shared).adapter_state)
    }

    async fn start_scan(&self) -> Result<()> {
        let mut shared = lock(&self.shared);
        if std::mem::take(&mut shared.fail_next_scan_start) {
            return Err(BleError::backend("mock scan start failure"));
        }
        if !shared.adapter_state.is_usable() {
            return Err(BleError::adapter_unavailable(shared.adapter_state));
        }
        shared.scanning = true;
        shared.scan_starts += 1;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let mut shared = lock(&self.shared);
        shared.scanning = false;
        shared.scan_stops += 1;
        Ok(())
    }

    async fn connect(&self, address: &str) -> Result<()> {
        {
            let mut shared = lock(&self.shared);
            let peripheral = shared
                .peripherals
                .get_mut(address)
                .ok_or_else(|| BleError::unknown_peripheral(address))?;

            peripheral.connect_attempts += 1;
            if !peripheral.reachable {
                return Err(BleError::connect_failure(address, "peripheral out of range"));
            }
            if peripheral.fail_connects > 0 {
                peripheral.fail_connects -= 1;
                return Err(BleError::connect_failure(address, "scripted connect failure"));
            }
            peripheral.connected = true;
        }
        self.emit(AdapterEvent::Connected(address.to_string()));
        Ok(())
    }

    async fn disconnect(&self, address: &str) -> Result<()> {
        let was_connected = {
            let mut shared = lock(&self.shared);
            match shared.peripherals.get_mut(address) {
                Some(peripheral) if peripheral.connected => {
                    peripheral.drop_link();
                    true
                }
                _ => false,
            }
        };
        if was_connected {
            self.emit(AdapterEvent::Disconnected(address.to_string()));
        }
        Ok(())
    }

    async fn discover_services(&self, address: &str) -> Result<Vec<GattService>> {
        self.with_connected(address, |p| Ok(p.model.services().cloned().collect()))
    }

    async fn discover_characteristics(
        &self,
        address: &str,
        service: &GattService,
    ) -> Result<Vec<GattCharacteristicRef>> {
        self.with_connected(address, |p| {
            p.model
                .characteristics_of(&service.uuid)
                .map(<[_]>::to_vec)
                .ok_or_else(|| BleError::service_discovery(address, format!("no service {}", service.uuid)))
        })
    }

    async fn read_value(
        &self,
        address: &str,
        characteristic: &GattCharacteristicRef,
    ) -> Result<Vec<u8>> {
        let uuid = characteristic.characteristic_uuid;
        self.with_connected(address, |p| {
            if p.model.read_fails(&uuid) {
                return Err(BleError::backend(format!("read of {uuid} rejected")));
            }
            Ok(p.model.value(&uuid).map(<[u8]>::to_vec).unwrap_or_default())
        })
    }

    async fn write_value(
        &self,
        address: &str,
        characteristic: &GattCharacteristicRef,
        value: &[u8],
    ) -> Result<()> {
        self.with_connected(address, |_| Ok(()))?;
        lock(&self.shared).writes.push(WriteRecord {
            address: address.to_string(),
            characteristic: characteristic.characteristic_uuid,
            value: value.to_vec(),
        });
        Ok(())
    }

    async fn subscribe(&self, address: &str, characteristic: &GattCharacteristicRef) -> Result<()> {
        let uuid = characteristic.characteristic_uuid;
        self.with_connected(address, |p| {
            if p.model.subscribe_fails(&uuid) || !characteristic.properties.can_subscribe() {
                return Err(BleError::subscribe(uuid.to_string(), "not permitted"));
            }
            p.subscribed.insert(uuid);
            Ok(())
        })
    }

    async fn unsubscribe(
        &self,
        address: &str,
        characteristic: &GattCharacteristicRef,
    ) -> Result<()> {
        self.with_connected(address, |p| {
            if p.subscribed.remove(&characteristic.characteristic_uuid) {
                p.unsubscribes += 1;
            }
            Ok(())
        })
    }

    async fn notifications(&self, address: &str) -> Result<mpsc::Receiver<Notification>> {
        self.with_connected(address, |p| {
            let (tx, rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
            p.notify_tx = Some(tx);
            Ok(rx)
        })
    }
}

/// Handle for scripting a mock adapter.
///
/// Clones share the same adapter.
#[derive(Debug, Clone)]
pub struct MockAdapterHandle {
    shared: SharedState,
}

impl MockAdapterHandle {
    async fn emit(&self, event: AdapterEvent) -> Result<()> {
        let tx = lock(&self.shared)
            .events_tx
            .clone()
            .ok_or_else(|| BleError::backend("adapter events not opened"))?;
        tx.send(event)
            .await
            .map_err(|_| BleError::backend("adapter event channel closed"))
    }

    /// Register a peripheral. It stays invisible until [`discover`](Self::discover).
    pub fn add_peripheral(&self, peripheral: MockPeripheral) {
        let address = peripheral.address().to_string();
        lock(&self.shared)
            .peripherals
            .insert(address, PeripheralState::new(peripheral));
    }

    /// Power the adapter on and report it.
    ///
    /// # Errors
    /// Returns an error if no event stream is open.
    pub async fn power_on(&self) -> Result<()> {
        self.set_adapter_state(AdapterState::PoweredOn).await
    }

    /// Change the adapter state and report it.
    ///
    /// # Errors
    /// Returns an error if no event stream is open.
    pub async fn set_adapter_state(&self, state: AdapterState) -> Result<()> {
        {
            let mut shared = lock(&self.shared);
            shared.adapter_state = state;
            if !state.is_usable() {
                shared.scanning = false;
            }
        }
        self.emit(AdapterEvent::StateChanged(state)).await
    }

    /// Deliver an advertisement of a registered peripheral.
    ///
    /// # Errors
    /// Returns `BleError::UnknownPeripheral` for unregistered addresses.
    pub async fn discover(&self, address: &str) -> Result<()> {
        let info = lock(&self.shared)
            .peripherals
            .get(address)
            .map(|p| p.model.info().clone())
            .ok_or_else(|| BleError::unknown_peripheral(address))?;
        self.emit(AdapterEvent::Discovered(info)).await
    }

    /// Deliver a custom advertisement for a registered peripheral, e.g. one
    /// without the scan response carrying its name.
    ///
    /// # Errors
    /// Returns `BleError::UnknownPeripheral` for unregistered addresses.
    pub async fn advertise(&self, info: DiscoveredPeripheral) -> Result<()> {
        if !lock(&self.shared).peripherals.contains_key(&info.address) {
            return Err(BleError::unknown_peripheral(&info.address));
        }
        self.emit(AdapterEvent::Discovered(info)).await
    }

    /// Push a notification from a subscribed characteristic.
    ///
    /// # Errors
    /// Returns `BleError::Disconnected` if the peripheral is not connected
    /// or nobody listens, and `BleError::SubscribeFailure` if the
    /// characteristic is not subscribed.
    pub async fn notify(&self, address: &str, characteristic: GattUuid, value: &[u8]) -> Result<()> {
        let tx = {
            let shared = lock(&self.shared);
            let peripheral = shared
                .peripherals
                .get(address)
                .ok_or_else(|| BleError::unknown_peripheral(address))?;
            if !peripheral.subscribed.contains(&characteristic) {
                return Err(BleError::subscribe(characteristic.to_string(), "not subscribed"));
            }
            peripheral
                .notify_tx
                .clone()
                .ok_or_else(|| BleError::disconnected(address))?
        };
        tx.send(Notification::new(characteristic, Bytes::copy_from_slice(value)))
            .await
            .map_err(|_| BleError::disconnected(address))
    }

    /// Push a frame split into notifications of at most `mtu` bytes.
    ///
    /// # Errors
    /// See [`notify`](Self::notify).
    pub async fn notify_chunked(
        &self,
        address: &str,
        characteristic: GattUuid,
        frame: &[u8],
        mtu: usize,
    ) -> Result<()> {
        for chunk in frame.chunks(mtu.max(1)) {
            self.notify(address, characteristic, chunk).await?;
        }
        Ok(())
    }

    /// Drop the link as if the peripheral went out of range.
    ///
    /// # Errors
    /// Returns an error if no event stream is open.
    pub async fn drop_link(&self, address: &str) -> Result<()> {
        if let Some(peripheral) = lock(&self.shared).peripherals.get_mut(address) {
            peripheral.drop_link();
        }
        self.emit(AdapterEvent::Disconnected(address.to_string())).await
    }

    /// Make connects to a peripheral succeed or fail.
    pub fn set_reachable(&self, address: &str, reachable: bool) {
        if let Some(peripheral) = lock(&self.shared).peripherals.get_mut(address) {
            peripheral.reachable = reachable;
        }
    }

    /// Fail the next `count` connect attempts to a peripheral.
    pub fn fail_next_connects(&self, address: &str, count: u32) {
        if let Some(peripheral) = lock(&self.shared).peripherals.get_mut(address) {
            peripheral.fail_connects = count;
        }
    }

    /// Fail the next scan start request.
    pub fn fail_next_scan_start(&self) {
        lock(&self.shared).fail_next_scan_start = true;
    }

    /// Connect attempts made to a peripheral.
    pub fn connect_attempts(&self, address: &str) -> u32 {
        lock(&self.shared)
            .peripherals
            .get(address)
            .map_or(0, |p| p.connect_attempts)
    }

    /// Whether a peripheral is connected.
    pub fn is_connected(&self, address: &str) -> bool {
        lock(&self.shared)
            .peripherals
            .get(address)
            .is_some_and(|p| p.connected)
    }

    /// Whether a characteristic of a peripheral is subscribed.
    pub fn is_subscribed(&self, address: &str, characteristic: GattUuid) -> bool {
        lock(&self.shared)
            .peripherals
            .get(address)
            .is_some_and(|p| p.subscribed.contains(&characteristic))
    }

    /// Subscriptions the host removed before the link went down.
    pub fn unsubscribes(&self, address: &str) -> usize {
        lock(&self.shared)
            .peripherals
            .get(address)
            .map_or(0, |p| p.unsubscribes)
    }

    /// Every write observed so far, in order.
    pub fn writes(&self) -> Vec<WriteRecord> {
        lock(&self.shared).writes.clone()
    }

    /// Whether the adapter is scanning.
    pub fn is_scanning(&self) -> bool {
        lock(&self.shared).scanning
    }

    /// Successful scan start requests.
    pub fn scan_starts(&self) -> usize {
        lock(&self.shared).scan_starts
    }

    /// Scan stop requests.
    pub fn scan_stops(&self) -> usize {
        lock(&self.shared).scan_stops
    }
}
