//! Device manager.
//!
//! This module provides the `DeviceManager`, which consumes adapter events,
//! admits allow-listed peripherals and runs one connection lifecycle task per
//! device. Domain events from all devices are aggregated into a single
//! stream for consumption by the notification layer.
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────────┐   spawn    ┌────────────┐
//! Adapter events ─────►│                  │──────────► │ Lifecycle  │──┐
//!  (discovered,        │  Manager loop    │  link down │ Task (A)   │  │
//!   disconnected,      │                  │──────────► └────────────┘  │
//!   state changes)     │                  │                            │  Domain events
//!                      │                  │   spawn    ┌────────────┐  ├──────────────► ManagerHandle
//!                      │                  │──────────► │ Lifecycle  │──┘
//!                      └──────────────────┘            │ Task (B)   │
//!                               │                      └────────────┘
//!                               ▼
//!                    Registry + ScanCoordinator
//! ```
//!
//! The manager loop is the only consumer of adapter events. It forwards a
//! `Disconnected` event to the lifecycle task owning that address; each task
//! owns its device's reassembly buffer and notification stream.
//!
//! # Examples
//!
//! ```no_run
//! use solarmon_ble::manager::DeviceManager;
//! use solarmon_ble::mock::MockAdapter;
//! use solarmon_core::Config;
//!
//! #[tokio::main]
//! async fn main() -> solarmon_ble::Result<()> {
//!     let config = Config::load("solarmon.toml")?;
//!     let (adapter, _handle) = MockAdapter::new();
//!
//!     let manager = DeviceManager::new(adapter, config)?;
//!     let mut handle = manager.start().await?;
//!
//!     while let Some(event) = handle.recv().await {
//!         println!("Event: {}", event);
//!     }
//!
//!     handle.shutdown().await
//! }
//! ```

use solarmon_core::{AllowList, Config, DeviceId, DiscoveredPeripheral, DomainEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{Id, JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use crate::adapter::{AdapterEvent, AdapterState, BleAdapter};
use crate::error::{BleError, Result};
use crate::lifecycle::{ConnectionLifecycle, DeviceContext, LifecycleOutcome, LinkSignal};
use crate::registry::{DeviceRegistry, RegistryEntry};
use crate::scan::ScanCoordinator;

/// Capacity of the domain event channel.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Capacity of each per-device link signal channel.
const LINK_CHANNEL_CAPACITY: usize = 4;

/// Handle for receiving domain events and controlling the manager.
///
/// # Examples
///
/// ```no_run
/// use solarmon_ble::manager::ManagerHandle;
/// use solarmon_ble::mock::MockAdapter;
/// use solarmon_core::DomainEvent;
///
/// # async fn example(mut handle: ManagerHandle<MockAdapter>) {
/// while let Some(event) = handle.recv().await {
///     match event {
///         DomainEvent::AverageCellVoltage { device, value, .. } => {
///             println!("{}: {:.3} V", device, value);
///         }
///         DomainEvent::BatteryLow { device, level } => {
///             eprintln!("{} battery low: {}%", device, level);
///         }
///         DomainEvent::DevicesConnected { devices } => {
///             println!("{} devices connected", devices.len());
///         }
///     }
/// }
/// # }
/// ```
pub struct ManagerHandle<A> {
    /// Event receiver for consuming events from lifecycle tasks.
    event_rx: mpsc::Receiver<DomainEvent>,

    registry: Arc<DeviceRegistry>,
    scan: Arc<ScanCoordinator<A>>,
    shutdown: CancellationToken,

    /// The manager loop.
    task: JoinHandle<()>,
}

impl<A: BleAdapter> ManagerHandle<A> {
    /// Receive the next domain event from any device.
    ///
    /// Returns `None` once the manager stopped and every lifecycle task
    /// terminated.
    pub async fn recv(&mut self) -> Option<DomainEvent> {
        self.event_rx.recv().await
    }

    /// Snapshot of the registry.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RegistryEntry> {
        self.registry.snapshot()
    }

    /// Shared registry.
    #[must_use]
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Whether the adapter is currently scanning.
    #[must_use]
    pub fn scan_active(&self) -> bool {
        self.scan.is_active()
    }

    /// Gracefully shutdown the manager and every lifecycle task.
    ///
    /// Connected devices are disconnected and scanning is stopped before
    /// this returns.
    ///
    /// # Errors
    ///
    /// Returns `BleError::Backend` if the manager loop panicked.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        self.task
            .await
            .map_err(|e| BleError::backend(format!("manager task failed: {e}")))
    }
}

/// Task termination classification for shutdown handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskTermination {
    /// Task ran to an outcome.
    Finished(LifecycleOutcome),
    /// Task was cancelled.
    Cancelled,
    /// Task panicked.
    Panic,
}

fn classify_task_result(result: &std::result::Result<(Id, LifecycleOutcome), JoinError>) -> TaskTermination {
    match result {
        Ok((_, outcome)) => TaskTermination::Finished(*outcome),
        Err(e) if e.is_cancelled() => TaskTermination::Cancelled,
        Err(_) => TaskTermination::Panic,
    }
}

/// Coordinates discovery, admission and per-device lifecycles.
///
/// # Lifecycle
///
/// 1. Create the manager with an adapter and configuration
/// 2. Call `start()` to open adapter events and spawn the manager loop
/// 3. Use the returned handle to receive domain events
/// 4. Call `shutdown()` on the handle to disconnect everything
pub struct DeviceManager<A> {
    adapter: Arc<A>,
    config: Arc<Config>,
    allow_list: Arc<AllowList>,
    registry: Arc<DeviceRegistry>,
    scan: Arc<ScanCoordinator<A>>,
}

impl<A: BleAdapter> DeviceManager<A> {
    /// Create a manager.
    ///
    /// # Errors
    ///
    /// Returns `BleError::Protocol` if the allow-list in `config` is invalid.
    pub fn new(adapter: A, config: Config) -> Result<Self> {
        let allow_list = config.allow_list()?;
        let adapter = Arc::new(adapter);

        Ok(Self {
            scan: Arc::new(ScanCoordinator::new(Arc::clone(&adapter))),
            registry: Arc::new(DeviceRegistry::new(config.failed_cooldown())),
            allow_list: Arc::new(allow_list),
            config: Arc::new(config),
            adapter,
        })
    }

    /// Shared registry.
    #[must_use]
    pub fn registry(&self) -> Arc<DeviceRegistry> {
        Arc::clone(&self.registry)
    }

    /// Start the manager loop and return the event handle.
    ///
    /// Adapter events are subscribed before anything else runs, so no event
    /// emitted after this returns is missed. If the adapter already reports
    /// powered on, scanning starts right away.
    ///
    /// # Errors
    ///
    /// Returns the adapter's error if the event stream cannot be opened.
    pub async fn start(self) -> Result<ManagerHandle<A>> {
        let adapter_events = self.adapter.events().await?;
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();

        info!(
            "Starting device manager for {} allowed devices",
            self.allow_list.len()
        );

        match self.adapter.adapter_state().await {
            Ok(AdapterState::PoweredOn) => {
                self.scan.on_adapter_state(AdapterState::PoweredOn).await;
            }
            Ok(state) => debug!("Adapter {}; waiting for power on", state),
            Err(e) => warn!("Failed to query adapter state: {}", e),
        }

        let ctx = Arc::new(DeviceContext {
            adapter: Arc::clone(&self.adapter),
            registry: Arc::clone(&self.registry),
            scan: Arc::clone(&self.scan),
            allow_list: Arc::clone(&self.allow_list),
            connect_slots: Arc::new(Semaphore::new(self.config.max_concurrent_connects.max(1))),
            config: Arc::clone(&self.config),
            events: event_tx,
            shutdown: shutdown.clone(),
        });

        let runner = Runner {
            ctx,
            adapter_events,
            tasks: JoinSet::new(),
            devices: HashMap::new(),
            links: HashMap::new(),
        };
        let task = tokio::spawn(runner.run());

        Ok(ManagerHandle {
            event_rx,
            registry: self.registry,
            scan: self.scan,
            shutdown,
            task,
        })
    }
}

/// Device owned by a running lifecycle task.
struct TaskInfo {
    device_id: DeviceId,
    address: String,
    generation: u64,
}

/// Link channel to a running lifecycle task.
struct Link {
    generation: u64,
    tx: mpsc::Sender<LinkSignal>,
}

/// State of the manager loop.
struct Runner<A> {
    ctx: Arc<DeviceContext<A>>,
    adapter_events: mpsc::Receiver<AdapterEvent>,
    tasks: JoinSet<LifecycleOutcome>,
    devices: HashMap<Id, TaskInfo>,
    links: HashMap<String, Link>,
}

impl<A: BleAdapter> Runner<A> {
    async fn run(mut self) {
        let shutdown = self.ctx.shutdown.clone();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(result) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => {
                    self.on_task_finished(&result);
                }
                event = self.adapter_events.recv() => match event {
                    Some(event) => self.on_adapter_event(event).await,
                    None => {
                        warn!("Adapter event stream closed");
                        break;
                    }
                },
            }
        }

        self.stop().await;
    }

    async fn on_adapter_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::StateChanged(state) => {
                info!("Adapter state changed: {}", state);
                self.ctx.scan.on_adapter_state(state).await;
            }
            AdapterEvent::Discovered(peripheral) => self.on_discovered(peripheral),
            AdapterEvent::Connected(address) => debug!(address = %address, "Link up"),
            AdapterEvent::Disconnected(address) => {
                debug!(address = %address, "Link down");
                if let Some(link) = self.links.get(&link_key(&address)) {
                    // A full channel already carries a pending Down.
                    let _ = link.tx.try_send(LinkSignal::Down);
                }
            }
        }
    }

    fn on_discovered(&mut self, peripheral: DiscoveredPeripheral) {
        match peripheral.signal_strength() {
            Some(signal) => trace!(
                address = %peripheral.address,
                name = ?peripheral.local_name,
                rssi = ?peripheral.rssi,
                "Discovered peripheral ({} signal)",
                signal
            ),
            None => trace!(
                address = %peripheral.address,
                name = ?peripheral.local_name,
                "Discovered peripheral"
            ),
        }

        if !self.ctx.allow_list.is_allowed(&peripheral) {
            return;
        }
        let Some(device_id) = DeviceId::resolve(&peripheral) else {
            warn!(address = %peripheral.address, "Peripheral has no usable identity");
            return;
        };
        let Some(generation) = self.ctx.registry.try_begin_connect(&device_id, &peripheral) else {
            trace!(id = %device_id, "Already tracked");
            return;
        };

        info!(
            id = %device_id,
            address = %peripheral.address,
            rssi = ?peripheral.rssi,
            "Connecting to allowed device"
        );

        let (link_tx, link_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let address = peripheral.address.clone();
        let span = info_span!("device", id = %device_id, address = %address);
        let lifecycle = ConnectionLifecycle::new(
            Arc::clone(&self.ctx),
            device_id.clone(),
            peripheral,
            generation,
            link_rx,
        );

        let abort = self.tasks.spawn(lifecycle.run().instrument(span));
        self.links.insert(
            link_key(&address),
            Link {
                generation,
                tx: link_tx,
            },
        );
        self.devices.insert(
            abort.id(),
            TaskInfo {
                device_id,
                address,
                generation,
            },
        );
    }

    fn on_task_finished(&mut self, result: &std::result::Result<(Id, LifecycleOutcome), JoinError>) {
        let id = match result {
            Ok((id, _)) => *id,
            Err(e) => e.id(),
        };
        let Some(info) = self.devices.remove(&id) else {
            return;
        };

        let key = link_key(&info.address);
        if self
            .links
            .get(&key)
            .is_some_and(|link| link.generation == info.generation)
        {
            self.links.remove(&key);
        }

        match classify_task_result(result) {
            TaskTermination::Finished(outcome) => {
                debug!(id = %info.device_id, "Lifecycle ended: {:?}", outcome);
            }
            TaskTermination::Cancelled => {
                self.ctx.registry.remove(&info.device_id, info.generation);
            }
            TaskTermination::Panic => {
                error!(id = %info.device_id, "Lifecycle task panicked");
                self.ctx.registry.remove(&info.device_id, info.generation);
            }
        }
    }

    async fn stop(&mut self) {
        self.ctx.shutdown.cancel();
        info!("Stopping {} device tasks", self.tasks.len());

        let mut finished = 0;
        let mut panicked = 0;
        while let Some(result) = self.tasks.join_next_with_id().await {
            match classify_task_result(&result) {
                TaskTermination::Finished(_) | TaskTermination::Cancelled => finished += 1,
                TaskTermination::Panic => panicked += 1,
            }
            self.on_task_finished(&result);
        }

        if let Err(e) = self.ctx.scan.ensure_stopped().await {
            warn!("Failed to stop scanning: {}", e);
        }
        info!(
            finished = finished,
            panicked = panicked,
            "Device manager stopped"
        );
    }
}

fn link_key(address: &str) -> String {
    address.to_ascii_lowercase()
}
