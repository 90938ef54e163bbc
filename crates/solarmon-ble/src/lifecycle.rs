//! Per-device connection lifecycle.
//!
//! Every admitted device gets one [`ConnectionLifecycle`] task. The task owns
//! the device's frame assembler and notification stream and drives it through
//! the state machine below. All per-device errors end here and become state
//! transitions; nothing propagates to the manager or to other devices.
//!
//! # State Machine
//!
//! ```text
//! Discovered ──► Connecting ──► ServiceDiscovery ──► Subscribing ──► Ready
//!                 ▲    │               │                  │            │
//!                 │    └───────────────┴──────────────────┘            │ link lost
//!                 │          attempt failed: retry or Failed           ▼
//!                 │                                               Disconnected
//!                 │                                                    │
//!                 └──────────────────── Reconnecting ◄─────────────────┘
//! ```
//!
//! - Initial connect: capped exponential backoff, `connect.max_attempts`
//!   attempts. Exhaustion marks the device failed; it is skipped until the
//!   failure cooldown passes.
//! - Reconnect after a link drop: `reconnect.max_attempts` attempts at a fixed
//!   delay. Giving up frees the registry entry so a later discovery can start
//!   over.
//! - A disconnect signal during an attempt aborts it at once; the task does
//!   not keep acting on a link that is gone.
//! - Any failed attempt ends with an explicit disconnect to release
//!   adapter-side resources.

use chrono::Utc;
use solarmon_core::{
    AllowList, Config, DeviceId, DiscoveredPeripheral, DomainEvent, GattCharacteristicRef,
};
use solarmon_protocol::{Command, CommandCode, DecodedFrame, FrameAssembler, FramePayload};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::adapter::{BleAdapter, Notification};
use crate::error::{BleError, Result};
use crate::registry::DeviceRegistry;
use crate::retry::RetryPolicy;
use crate::scan::ScanCoordinator;

/// Lifecycle state of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Admitted from an advertisement, nothing attempted yet.
    Discovered,

    /// Connect request in flight.
    Connecting,

    /// Enumerating services and characteristics.
    ServiceDiscovery,

    /// Subscribing, reading and sending the init commands.
    Subscribing,

    /// Data characteristic subscribed; frames are streaming.
    Ready,

    /// Link lost or released.
    Disconnected,

    /// Bounded reconnect in progress.
    Reconnecting,

    /// Connect attempts exhausted.
    Failed,
}

impl LifecycleState {
    /// Check if transition to another state is valid.
    ///
    /// # Examples
    ///
    /// ```
    /// use solarmon_ble::lifecycle::LifecycleState;
    ///
    /// assert!(LifecycleState::Subscribing.can_transition_to(LifecycleState::Ready));
    /// assert!(!LifecycleState::Ready.can_transition_to(LifecycleState::Connecting));
    /// ```
    #[must_use]
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        matches!(
            (self, next),
            (Discovered, Connecting)
                | (Connecting, ServiceDiscovery)
                | (ServiceDiscovery, Subscribing)
                | (Subscribing, Ready)
                | (Connecting | ServiceDiscovery | Subscribing, Connecting)
                | (Connecting | ServiceDiscovery | Subscribing, Failed)
                | (Connecting | ServiceDiscovery | Subscribing, Disconnected)
                | (Connecting | ServiceDiscovery | Subscribing, Reconnecting)
                | (Discovered, Disconnected)
                | (Ready, Disconnected)
                | (Disconnected, Reconnecting)
                | (Reconnecting, Connecting)
                | (Reconnecting, Disconnected)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Discovered => "discovered",
            LifecycleState::Connecting => "connecting",
            LifecycleState::ServiceDiscovery => "service discovery",
            LifecycleState::Subscribing => "subscribing",
            LifecycleState::Ready => "ready",
            LifecycleState::Disconnected => "disconnected",
            LifecycleState::Reconnecting => "reconnecting",
            LifecycleState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// How a lifecycle task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// Stopped by manager shutdown.
    Shutdown,

    /// Initial connect attempts exhausted.
    Failed,

    /// Link lost during the initial connect.
    LinkLost,

    /// Reconnect attempts exhausted after a link drop.
    GaveUp,
}

/// Signal forwarded by the manager from adapter events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkSignal {
    /// The adapter reported the link down.
    Down,
}

/// Collaborators shared by every lifecycle task.
pub(crate) struct DeviceContext<A> {
    pub adapter: Arc<A>,
    pub registry: Arc<DeviceRegistry>,
    pub scan: Arc<ScanCoordinator<A>>,
    pub allow_list: Arc<AllowList>,
    pub config: Arc<Config>,
    pub events: mpsc::Sender<DomainEvent>,
    pub connect_slots: Arc<Semaphore>,
    pub shutdown: CancellationToken,
}

/// An established connection.
struct Session {
    data: GattCharacteristicRef,
    battery: Option<GattCharacteristicRef>,
    battery_level: Option<u8>,
    subscribed: Vec<GattCharacteristicRef>,
    notifications: mpsc::Receiver<Notification>,
}

/// Result of one connection attempt.
enum Step {
    Ready(Session),
    Failed(BleError),
    LinkLost,
    Shutdown,
}

/// Why the ready loop ended.
enum Exit {
    LinkLost,
    Shutdown,
}

/// Connection lifecycle of one device.
pub struct ConnectionLifecycle<A> {
    ctx: Arc<DeviceContext<A>>,
    device_id: DeviceId,
    peripheral: DiscoveredPeripheral,
    generation: u64,
    link: mpsc::Receiver<LinkSignal>,
    state: LifecycleState,
    assembler: FrameAssembler,
    last_battery_low: Option<u8>,
}

impl<A: BleAdapter> ConnectionLifecycle<A> {
    pub(crate) fn new(
        ctx: Arc<DeviceContext<A>>,
        device_id: DeviceId,
        peripheral: DiscoveredPeripheral,
        generation: u64,
        link: mpsc::Receiver<LinkSignal>,
    ) -> Self {
        Self {
            ctx,
            device_id,
            peripheral,
            generation,
            link,
            state: LifecycleState::Discovered,
            assembler: FrameAssembler::new(),
            last_battery_low: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Run the lifecycle to completion.
    pub async fn run(mut self) -> LifecycleOutcome {
        let policy = RetryPolicy::from(&self.ctx.config.connect);

        let mut session = match self.connect_with_retry(policy).await {
            Ok(session) => session,
            Err(outcome) => return outcome,
        };

        loop {
            self.on_ready(&session).await;

            match self.stream(&mut session).await {
                Exit::Shutdown => {
                    self.unsubscribe_all(&session).await;
                    self.release().await;
                    return LifecycleOutcome::Shutdown;
                }
                Exit::LinkLost => {}
            }

            warn!("Link lost");
            drop(session);
            advance(&mut self.state, LifecycleState::Disconnected);
            self.ctx.registry.mark_reconnecting(&self.device_id, self.generation);
            self.ctx.scan.on_device_disconnected().await;

            session = match self.reconnect().await {
                Ok(session) => session,
                Err(outcome) => return outcome,
            };
        }
    }

    async fn connect_with_retry(
        &mut self,
        policy: RetryPolicy,
    ) -> std::result::Result<Session, LifecycleOutcome> {
        let mut last_error = None;

        for attempt in 1..=policy.max_attempts() {
            let delay = policy.delay_before(attempt);
            if !delay.is_zero() {
                debug!("Retrying in {:?}", delay);
                if !self.sleep(delay).await {
                    self.release().await;
                    return Err(LifecycleOutcome::Shutdown);
                }
            }

            debug!("Connection attempt {}/{}", attempt, policy.max_attempts());
            match self.attempt().await {
                Step::Ready(session) => return Ok(session),
                Step::Shutdown => {
                    self.release().await;
                    return Err(LifecycleOutcome::Shutdown);
                }
                Step::LinkLost => {
                    warn!("Disconnected while connecting; abandoning attempts");
                    self.abandon().await;
                    return Err(LifecycleOutcome::LinkLost);
                }
                Step::Failed(e) => {
                    warn!("Connection attempt {}/{} failed: {}", attempt, policy.max_attempts(), e);
                    self.ctx
                        .registry
                        .record_attempt(&self.device_id, self.generation, e.to_string());
                    self.disconnect_quietly().await;
                    let retryable = e.is_retryable();
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        let error = last_error.map_or_else(|| "no attempt made".to_string(), |e| e.to_string());
        self.fail(error).await;
        Err(LifecycleOutcome::Failed)
    }

    async fn reconnect(&mut self) -> std::result::Result<Session, LifecycleOutcome> {
        let policy = RetryPolicy::from(&self.ctx.config.reconnect);

        for attempt in 1..=policy.max_attempts() {
            advance(&mut self.state, LifecycleState::Reconnecting);
            self.ctx.registry.mark_reconnecting(&self.device_id, self.generation);
            if !self.sleep(policy.initial_delay()).await {
                self.release().await;
                return Err(LifecycleOutcome::Shutdown);
            }

            info!("Reconnect attempt {}/{}", attempt, policy.max_attempts());
            self.ctx.registry.mark_connecting(&self.device_id, self.generation);
            match self.attempt().await {
                Step::Ready(session) => return Ok(session),
                Step::Shutdown => {
                    self.release().await;
                    return Err(LifecycleOutcome::Shutdown);
                }
                Step::LinkLost => {
                    warn!("Reconnect attempt {} interrupted by disconnect", attempt);
                    self.disconnect_quietly().await;
                }
                Step::Failed(e) => {
                    warn!("Reconnect attempt {} failed: {}", attempt, e);
                    self.disconnect_quietly().await;
                }
            }
        }

        warn!("Reconnect gave up after {} attempts", policy.max_attempts());
        advance(&mut self.state, LifecycleState::Disconnected);
        self.ctx.registry.remove(&self.device_id, self.generation);
        Err(LifecycleOutcome::GaveUp)
    }

    /// One bounded establish attempt, aborted by shutdown or a link signal.
    async fn attempt(&mut self) -> Step {
        let ctx = Arc::clone(&self.ctx);

        // Signals left over from an earlier link belong to that link.
        while self.link.try_recv().is_ok() {}

        let _permit = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => return Step::Shutdown,
            permit = ctx.connect_slots.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return Step::Shutdown,
            },
        };

        let step = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => Step::Shutdown,
            signal = self.link.recv() => match signal {
                Some(LinkSignal::Down) => Step::LinkLost,
                None => Step::Shutdown,
            },
            result = establish(&ctx, &self.peripheral.address, &mut self.state) => match result {
                Ok(session) => Step::Ready(session),
                Err(e) => Step::Failed(e),
            },
        };

        if matches!(step, Step::Ready(_)) {
            self.assembler.reset();
        }
        step
    }

    async fn on_ready(&mut self, session: &Session) {
        advance(&mut self.state, LifecycleState::Ready);
        self.ctx.registry.mark_connected(&self.device_id, self.generation);
        info!("Device ready, streaming from {}", session.data);

        self.ctx
            .scan
            .on_device_connected(&self.ctx.registry, &self.ctx.allow_list)
            .await;
        self.emit(DomainEvent::DevicesConnected {
            devices: self.ctx.registry.connected_devices(),
        });

        if let Some(level) = session.battery_level {
            self.report_battery(level);
        }
    }

    /// Ready loop: consume notifications until the link or the manager ends.
    async fn stream(&mut self, session: &mut Session) -> Exit {
        loop {
            tokio::select! {
                biased;
                _ = self.ctx.shutdown.cancelled() => return Exit::Shutdown,
                signal = self.link.recv() => match signal {
                    Some(LinkSignal::Down) => return Exit::LinkLost,
                    None => return Exit::Shutdown,
                },
                notification = session.notifications.recv() => match notification {
                    Some(notification) => self.handle_notification(session, notification),
                    None => return Exit::LinkLost,
                },
            }
        }
    }

    fn handle_notification(&mut self, session: &Session, notification: Notification) {
        if session.data.is(&notification.characteristic) {
            let frame = self
                .assembler
                .push(&notification.value)
                .and_then(|frame| frame.map(DecodedFrame::require_known).transpose());
            match frame {
                Ok(Some(frame)) => self.handle_frame(frame),
                Ok(None) => {}
                Err(e) => warn!("Discarding frame: {}", e),
            }
        } else if session
            .battery
            .as_ref()
            .is_some_and(|battery| battery.is(&notification.characteristic))
        {
            if let Some(level) = battery_percent(&notification.value) {
                self.report_battery(level);
            }
        } else {
            trace!(
                "Notification from {}: {} bytes",
                notification.characteristic,
                notification.value.len()
            );
        }
    }

    fn handle_frame(&mut self, frame: DecodedFrame) {
        match frame.payload {
            FramePayload::CellInfo(info) => match info.average() {
                Some(average) => {
                    debug!(
                        "Cell info: {} cells, average {:.3} V",
                        info.populated().count(),
                        average
                    );
                    self.emit(DomainEvent::AverageCellVoltage {
                        device: self.device_id.to_string(),
                        value: average,
                        at: Utc::now(),
                    });
                }
                None => debug!("Cell info frame without populated cells"),
            },
            FramePayload::Settings(settings) => info!(
                "Settings: {} cells, start balance {:.3} V",
                settings.cell_count, settings.start_balance_voltage
            ),
            FramePayload::DeviceInfo(device) => info!(
                "Device info: {} serial {} firmware {} hardware {}",
                device.device_name,
                device.serial_number,
                device.firmware_version,
                device.hardware_version
            ),
            FramePayload::Unknown => debug!("Frame {} carries no payload", frame.frame_type),
        }
    }

    fn report_battery(&mut self, level: u8) {
        debug!("Battery level {}%", level);
        if level >= self.ctx.config.events.battery_low_threshold {
            self.last_battery_low = None;
            return;
        }
        if self.last_battery_low == Some(level) {
            return;
        }
        self.last_battery_low = Some(level);
        warn!("Battery low: {}%", level);
        self.emit(DomainEvent::BatteryLow {
            device: self.device_id.to_string(),
            level,
        });
    }

    fn emit(&self, event: DomainEvent) {
        match self.ctx.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Event channel full, dropping {}", event);
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!("Event channel closed, dropping {}", event);
            }
        }
    }

    /// Sleep unless shutdown comes first. Returns `false` on shutdown.
    async fn sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.ctx.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn disconnect_quietly(&self) {
        if let Err(e) = self.ctx.adapter.disconnect(&self.peripheral.address).await {
            debug!("Disconnect failed: {}", e);
        }
    }

    async fn fail(&mut self, error: String) {
        advance(&mut self.state, LifecycleState::Failed);
        error!("Giving up on device: {}", error);
        self.ctx
            .registry
            .mark_failed(&self.device_id, self.generation, error);
        self.ctx.scan.on_device_disconnected().await;
    }

    /// Link lost during the initial connect: free the identity.
    async fn abandon(&mut self) {
        advance(&mut self.state, LifecycleState::Disconnected);
        self.disconnect_quietly().await;
        self.ctx.registry.remove(&self.device_id, self.generation);
        self.ctx.scan.on_device_disconnected().await;
    }

    /// Shutdown: remove the listeners registered by this connection.
    async fn unsubscribe_all(&self, session: &Session) {
        for characteristic in &session.subscribed {
            if let Err(e) = self
                .ctx
                .adapter
                .unsubscribe(&self.peripheral.address, characteristic)
                .await
            {
                debug!("Unsubscribe from {} failed: {}", characteristic, e);
            }
        }
    }

    /// Shutdown: disconnect and drop the entry.
    async fn release(&mut self) {
        advance(&mut self.state, LifecycleState::Disconnected);
        self.disconnect_quietly().await;
        self.ctx.registry.remove(&self.device_id, self.generation);
        debug!("Released");
    }
}

fn advance(state: &mut LifecycleState, next: LifecycleState) {
    if *state == next {
        return;
    }
    if !state.can_transition_to(next) {
        warn!("Unexpected lifecycle transition {} -> {}", state, next);
    }
    trace!("{} -> {}", state, next);
    *state = next;
}

/// Connect, discover, subscribe and initialise one device.
async fn establish<A: BleAdapter>(
    ctx: &DeviceContext<A>,
    address: &str,
    state: &mut LifecycleState,
) -> Result<Session> {
    let gatt = &ctx.config.gatt;

    advance(state, LifecycleState::Connecting);
    ctx.adapter.connect(address).await?;

    advance(state, LifecycleState::ServiceDiscovery);
    let characteristics = discover_all(ctx, address).await.map_err(|e| match e {
        e @ BleError::Disconnected { .. } => e,
        e => BleError::service_discovery(address, e.to_string()),
    })?;
    debug!("Discovered {} characteristics", characteristics.len());

    let data = characteristics
        .iter()
        .find(|c| c.is(&gatt.data_characteristic))
        .cloned()
        .ok_or_else(|| BleError::characteristic_not_found(gatt.data_characteristic.to_string()))?;
    let battery = characteristics
        .iter()
        .find(|c| c.is(&gatt.battery_level_characteristic))
        .cloned();

    advance(state, LifecycleState::Subscribing);
    let notifications = ctx.adapter.notifications(address).await?;

    let mut subscribed = Vec::new();
    for characteristic in &characteristics {
        let is_data = characteristic == &data;
        if !is_data && !characteristic.properties.can_subscribe() {
            continue;
        }
        match ctx.adapter.subscribe(address, characteristic).await {
            Ok(()) => {
                debug!("Subscribed to {}", characteristic);
                subscribed.push(characteristic.clone());
            }
            Err(e) if is_data => {
                return Err(BleError::subscribe(characteristic.to_string(), e.to_string()));
            }
            Err(e) => warn!("Subscribe to {} failed: {}", characteristic, e),
        }
    }

    let mut battery_level = None;
    for characteristic in characteristics.iter().filter(|c| c.properties.read) {
        match ctx.adapter.read_value(address, characteristic).await {
            Ok(value) => {
                debug!("Read {}: {}", characteristic, hex(&value));
                if battery.as_ref() == Some(characteristic) {
                    battery_level = battery_percent(&value);
                }
            }
            Err(e) => warn!("Diagnostic read of {} failed: {}", characteristic, e),
        }
    }

    let protocol = &ctx.config.protocol;
    for (i, command) in protocol.init_commands.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(protocol.command_interval()).await;
        }
        let code = CommandCode::from(*command);
        debug!("Sending {} command", code);
        ctx.adapter
            .write_value(address, &data, &Command::new(code).encode())
            .await?;
    }

    Ok(Session {
        data,
        battery,
        battery_level,
        subscribed,
        notifications,
    })
}

async fn discover_all<A: BleAdapter>(
    ctx: &DeviceContext<A>,
    address: &str,
) -> Result<Vec<GattCharacteristicRef>> {
    let mut characteristics = Vec::new();
    for service in ctx.adapter.discover_services(address).await? {
        characteristics.extend(ctx.adapter.discover_characteristics(address, &service).await?);
    }
    Ok(characteristics)
}

/// Battery Level value as a percentage. Values above 100 are discarded.
fn battery_percent(value: &[u8]) -> Option<u8> {
    match value.first().copied() {
        Some(level) if level <= 100 => Some(level),
        Some(level) => {
            warn!("Ignoring out-of-range battery level {}", level);
            None
        }
        None => None,
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;
    use rstest::rstest;

    #[rstest]
    #[case(Discovered, Connecting)]
    #[case(Connecting, ServiceDiscovery)]
    #[case(ServiceDiscovery, Subscribing)]
    #[case(Subscribing, Ready)]
    #[case(ServiceDiscovery, Connecting)]
    #[case(Subscribing, Failed)]
    #[case(Ready, Disconnected)]
    #[case(Disconnected, Reconnecting)]
    #[case(Reconnecting, Connecting)]
    #[case(Subscribing, Reconnecting)]
    #[case(Reconnecting, Disconnected)]
    fn test_valid_transitions(#[case] from: LifecycleState, #[case] to: LifecycleState) {
        assert!(from.can_transition_to(to), "{from} -> {to}");
    }

    #[rstest]
    #[case(Discovered, Ready)]
    #[case(Connecting, Ready)]
    #[case(Ready, Connecting)]
    #[case(Ready, Failed)]
    #[case(Failed, Connecting)]
    #[case(Disconnected, Connecting)]
    fn test_invalid_transitions(#[case] from: LifecycleState, #[case] to: LifecycleState) {
        assert!(!from.can_transition_to(to), "{from} -> {to}");
    }

    #[rstest]
    #[case(&[0], Some(0))]
    #[case(&[42], Some(42))]
    #[case(&[100, 7], Some(100))]
    #[case(&[101], None)]
    #[case(&[0xFF], None)]
    #[case(&[], None)]
    fn test_battery_percent(#[case] value: &[u8], #[case] expected: Option<u8>) {
        assert_eq!(battery_percent(value), expected);
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0x00, 0x5a, 0xff]), "005aff");
    }
}
