//! Device registry.
//!
//! The registry is the single shared mutable structure of the connection
//! layer. It owns one entry per tracked [`DeviceId`] and is the only place
//! where an entry's state changes; lifecycle tasks and the manager event loop
//! go through its methods and never see the underlying map.
//!
//! # Deduplication
//!
//! [`DeviceRegistry::try_begin_connect`] is the sole admission point for a
//! new connection lifecycle. The check ("is this device already in flight?")
//! and the insert happen under one lock, so two discovery events for the same
//! device can never both be admitted. Admission is also refused when another
//! tracked identity shares the advertisement's hardware address, which keeps
//! one lifecycle per physical peripheral even when its identity resolves
//! differently across advertisements.
//!
//! # Generations
//!
//! Every admission hands out a fresh generation number. Mutating methods take
//! the generation they were admitted with and ignore calls whose generation
//! no longer matches the entry, so a task that outlived its entry cannot
//! overwrite a newer one.

use solarmon_core::{AllowList, ConnectedDevice, DeviceId, DiscoveredPeripheral, addresses_equal};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Registry-level state of a tracked device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    /// Known but not being connected.
    Idle,

    /// A lifecycle is connecting, discovering or subscribing.
    Connecting,

    /// Subscribed and streaming.
    Connected,

    /// Link dropped; a bounded reconnect is running.
    Reconnecting,

    /// Connection attempts exhausted; skipped until the cooldown passes.
    Failed,
}

impl EntryState {
    /// Whether a lifecycle currently owns this device.
    #[must_use]
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            EntryState::Connecting | EntryState::Connected | EntryState::Reconnecting
        )
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryState::Idle => write!(f, "idle"),
            EntryState::Connecting => write!(f, "connecting"),
            EntryState::Connected => write!(f, "connected"),
            EntryState::Reconnecting => write!(f, "reconnecting"),
            EntryState::Failed => write!(f, "failed"),
        }
    }
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    /// Canonical identity, resolved at first discovery.
    pub device_id: DeviceId,

    /// Advertisement that admitted the device.
    pub peripheral: DiscoveredPeripheral,

    /// Current state.
    pub state: EntryState,

    /// Failed connection attempts in the current lifecycle.
    pub retry_count: u32,

    /// Last error observed, if any.
    pub last_error: Option<String>,

    /// Admission generation.
    pub generation: u64,

    failed_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<DeviceId, RegistryEntry>,
    next_generation: u64,
}

/// Shared registry of tracked devices.
///
/// # Examples
///
/// ```
/// use solarmon_ble::registry::{DeviceRegistry, EntryState};
/// use solarmon_core::{DeviceId, DiscoveredPeripheral};
/// use std::time::Duration;
///
/// let registry = DeviceRegistry::new(Duration::from_secs(60));
/// let peripheral = DiscoveredPeripheral::new("c8:47:80:12:9b:46").with_local_name("Andrii 1");
/// let id = DeviceId::resolve(&peripheral).unwrap();
///
/// let generation = registry.try_begin_connect(&id, &peripheral).unwrap();
/// assert!(registry.try_begin_connect(&id, &peripheral).is_none());
///
/// registry.mark_connected(&id, generation);
/// assert_eq!(registry.state(&id), Some(EntryState::Connected));
/// ```
#[derive(Debug)]
pub struct DeviceRegistry {
    inner: Mutex<Inner>,
    failed_cooldown: Duration,
}

impl DeviceRegistry {
    /// Create an empty registry.
    ///
    /// `failed_cooldown` is how long a [`EntryState::Failed`] device is
    /// refused admission.
    pub fn new(failed_cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            failed_cooldown,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically admit a device for connection.
    ///
    /// Returns the new generation, or `None` when the device is already in
    /// flight or still cooling down after a failure. A device is also refused
    /// when another identity with the same hardware address is tracked, so a
    /// peripheral first seen without its name and later with it keeps the
    /// identity it was admitted under; the name is recorded on that entry.
    pub fn try_begin_connect(&self, id: &DeviceId, peripheral: &DiscoveredPeripheral) -> Option<u64> {
        let mut inner = self.lock();

        if let Some(entry) = inner.entries.get(id)
            && self.blocks_admission(entry)
        {
            debug!("{} is {}, ignoring discovery", id, entry.state);
            return None;
        }

        if !peripheral.address.is_empty() {
            if let Some(entry) = inner.entries.values_mut().find(|entry| {
                entry.device_id != *id
                    && addresses_equal(&entry.peripheral.address, &peripheral.address)
                    && self.blocks_admission(entry)
            }) {
                debug!(
                    "{} already tracked as {} ({}), ignoring discovery",
                    peripheral.address, entry.device_id, entry.state
                );
                if entry.peripheral.local_name.is_none() {
                    entry.peripheral.local_name.clone_from(&peripheral.local_name);
                }
                return None;
            }

            inner
                .entries
                .retain(|_, entry| !addresses_equal(&entry.peripheral.address, &peripheral.address));
        }

        inner.next_generation += 1;
        let generation = inner.next_generation;
        inner.entries.insert(
            id.clone(),
            RegistryEntry {
                device_id: id.clone(),
                peripheral: peripheral.clone(),
                state: EntryState::Connecting,
                retry_count: 0,
                last_error: None,
                generation,
                failed_at: None,
            },
        );
        Some(generation)
    }

    fn blocks_admission(&self, entry: &RegistryEntry) -> bool {
        entry.state.is_in_flight()
            || (entry.state == EntryState::Failed
                && entry
                    .failed_at
                    .is_some_and(|failed_at| failed_at.elapsed() < self.failed_cooldown))
    }

    fn update<F>(&self, id: &DeviceId, generation: u64, f: F) -> bool
    where
        F: FnOnce(&mut RegistryEntry),
    {
        let mut inner = self.lock();
        match inner.entries.get_mut(id) {
            Some(entry) if entry.generation == generation => {
                f(entry);
                true
            }
            _ => {
                debug!("Ignoring stale registry update for {} (generation {})", id, generation);
                false
            }
        }
    }

    /// Record a failed attempt.
    pub fn record_attempt(&self, id: &DeviceId, generation: u64, error: impl Into<String>) -> bool {
        let error = error.into();
        self.update(id, generation, |entry| {
            entry.retry_count += 1;
            entry.last_error = Some(error);
        })
    }

    /// Move a device into [`EntryState::Connecting`] again (reconnect attempt).
    pub fn mark_connecting(&self, id: &DeviceId, generation: u64) -> bool {
        self.update(id, generation, |entry| entry.state = EntryState::Connecting)
    }

    /// Mark a device subscribed and streaming.
    pub fn mark_connected(&self, id: &DeviceId, generation: u64) -> bool {
        self.update(id, generation, |entry| {
            entry.state = EntryState::Connected;
            entry.retry_count = 0;
        })
    }

    /// Mark a device whose link dropped while its reconnect runs.
    pub fn mark_reconnecting(&self, id: &DeviceId, generation: u64) -> bool {
        self.update(id, generation, |entry| entry.state = EntryState::Reconnecting)
    }

    /// Mark a device failed; it is skipped until the cooldown passes.
    pub fn mark_failed(&self, id: &DeviceId, generation: u64, error: impl Into<String>) -> bool {
        let error = error.into();
        self.update(id, generation, |entry| {
            entry.state = EntryState::Failed;
            entry.last_error = Some(error);
            entry.failed_at = Some(Instant::now());
        })
    }

    /// Drop an entry, freeing its identity for a future discovery.
    pub fn remove(&self, id: &DeviceId, generation: u64) -> bool {
        let mut inner = self.lock();
        match inner.entries.get(id) {
            Some(entry) if entry.generation == generation => {
                inner.entries.remove(id);
                true
            }
            _ => false,
        }
    }

    /// State of a device, if tracked.
    #[must_use]
    pub fn state(&self, id: &DeviceId) -> Option<EntryState> {
        self.lock().entries.get(id).map(|entry| entry.state)
    }

    /// Whether every allow-listed device has a connected entry.
    #[must_use]
    pub fn all_devices_connected(&self, allow_list: &AllowList) -> bool {
        let inner = self.lock();
        allow_list.entries().iter().all(|allowed| {
            inner
                .entries
                .values()
                .any(|entry| entry.state == EntryState::Connected && allowed.matches(&entry.peripheral))
        })
    }

    /// Connected devices, ordered by identity.
    #[must_use]
    pub fn connected_devices(&self) -> Vec<ConnectedDevice> {
        let mut connected: Vec<_> = self
            .lock()
            .entries
            .values()
            .filter(|entry| entry.state == EntryState::Connected)
            .map(|entry| (entry.device_id.clone(), ConnectedDevice::from(&entry.peripheral)))
            .collect();
        connected.sort_by(|a, b| a.0.cmp(&b.0));
        connected.into_iter().map(|(_, device)| device).collect()
    }

    /// Copy of every entry, ordered by identity.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RegistryEntry> {
        let mut entries: Vec<_> = self.lock().entries.values().cloned().collect();
        entries.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        entries
    }

    /// Number of tracked devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` if no device is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
