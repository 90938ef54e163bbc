//! Common test utilities for integration tests.
//!
//! Drives a [`DeviceManager`] over the mock adapter. Tests run with the
//! Tokio clock paused, so retry backoff and command intervals elapse
//! instantly while keeping their relative order.
//!
//! # Usage Examples
//!
//! ```ignore
//! use crate::common;
//!
//! let mut h = common::start(common::config(&[common::NAME]), vec![common::bms(common::ADDRESS, common::NAME)]).await;
//! h.adapter.discover(common::ADDRESS).await.unwrap();
//! assert!(common::wait_until(|| h.is_connected(common::NAME)).await);
//! ```

#![allow(dead_code)]

use solarmon_ble::mock::{MockAdapter, MockAdapterHandle, MockPeripheral};
use solarmon_ble::{DeviceManager, EntryState, ManagerHandle};
use solarmon_core::config::GattConfig;
use solarmon_core::constants::{
    CELL_VOLTAGE_OFFSET, FRAME_LENGTH, FRAME_START, FRAME_TYPE_CELL_INFO, FRAME_TYPE_OFFSET,
};
use solarmon_core::{AllowedDevice, Config, DeviceId, DiscoveredPeripheral, DomainEvent, GattUuid};
use std::time::Duration;

pub const ADDRESS: &str = "c8:47:80:12:9b:46";
pub const NAME: &str = "Andrii 1";

pub const OTHER_ADDRESS: &str = "c8:47:80:12:9b:47";
pub const OTHER_NAME: &str = "Andrii 2";

/// Typical notification payload size seen from these devices.
pub const MTU: usize = 128;

/// Upper bound on virtual time a condition may take to become true.
const WAIT_LIMIT: Duration = Duration::from_secs(120);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Running manager plus the script handle of its adapter.
pub struct Harness {
    pub adapter: MockAdapterHandle,
    pub manager: ManagerHandle<MockAdapter>,
}

impl Harness {
    pub fn state(&self, name: &str) -> Option<EntryState> {
        self.manager.registry().state(&device_id(name))
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.state(name) == Some(EntryState::Connected)
    }

    /// Next domain event, or `None` if nothing arrives within `limit`.
    pub async fn next_event(&mut self, limit: Duration) -> Option<DomainEvent> {
        tokio::time::timeout(limit, self.manager.recv())
            .await
            .ok()
            .flatten()
    }

    /// Skip events until one with the given name arrives.
    pub async fn next_named(&mut self, name: &str) -> Option<DomainEvent> {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = self.next_event(remaining).await?;
            if event.name() == name {
                return Some(event);
            }
        }
    }

    /// Send a frame to the data characteristic, split at the default MTU.
    pub async fn send_frame(&self, address: &str, frame: &[u8]) {
        self.adapter
            .notify_chunked(address, data_uuid(), frame, MTU)
            .await
            .unwrap();
    }
}

pub fn device_id(name: &str) -> DeviceId {
    DeviceId::new(name).unwrap()
}

pub fn data_uuid() -> GattUuid {
    GattConfig::default().data_characteristic
}

pub fn battery_uuid() -> GattUuid {
    GattConfig::default().battery_level_characteristic
}

pub fn bms(address: &str, name: &str) -> MockPeripheral {
    MockPeripheral::bms(
        DiscoveredPeripheral::new(address)
            .with_local_name(name)
            .with_rssi(-58),
    )
}

pub fn config(names: &[&str]) -> Config {
    Config::new(names.iter().map(|n| AllowedDevice::by_name(*n)).collect())
}

/// Start a manager over a powered-on mock adapter with the given peripherals.
pub async fn start(config: Config, peripherals: Vec<MockPeripheral>) -> Harness {
    let (adapter, handle) = MockAdapter::new();
    for peripheral in peripherals {
        handle.add_peripheral(peripheral);
    }

    let manager = DeviceManager::new(adapter, config)
        .unwrap()
        .start()
        .await
        .unwrap();
    handle.power_on().await.unwrap();
    assert!(wait_until(|| handle.is_scanning()).await);

    Harness {
        adapter: handle,
        manager,
    }
}

/// Poll `condition` until it holds or the virtual time limit passes.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    condition()
}

/// Sealed cell info frame. Voltages are rounded to whole millivolts.
pub fn cell_info_frame(voltages: &[f64]) -> Vec<u8> {
    let mut frame = vec![0u8; FRAME_LENGTH];
    frame[..FRAME_START.len()].copy_from_slice(&FRAME_START);
    frame[FRAME_TYPE_OFFSET] = FRAME_TYPE_CELL_INFO;
    for (slot, volts) in voltages.iter().enumerate() {
        let millivolts = (volts * 1000.0).round() as u16;
        let offset = CELL_VOLTAGE_OFFSET + slot * 2;
        frame[offset..offset + 2].copy_from_slice(&millivolts.to_le_bytes());
    }
    let last = frame.len() - 1;
    frame[last] = solarmon_protocol::checksum(&frame[..last]);
    frame
}

/// Flip the checksum byte so the frame no longer validates.
pub fn corrupt_checksum(frame: &mut [u8]) {
    let last = frame.len() - 1;
    frame[last] = frame[last].wrapping_add(1);
}
