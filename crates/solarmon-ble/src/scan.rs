//! Scan coordination.
//!
//! The adapter supports a single scan session, and scanning costs power and
//! airtime, so the coordinator keeps the adapter scanning exactly while some
//! allow-listed device is still missing.
//!
//! ```text
//!            powered on / device lost
//!   ┌──────────┐ ─────────────────────► ┌──────────┐
//!   │ Stopped  │                        │ Scanning │
//!   └──────────┘ ◄───────────────────── └──────────┘
//!                 all devices connected
//!
//!   powered off / unauthorized / unsupported: scanning disabled
//! ```
//!
//! All transitions are idempotent. The `active` flag changes only after the
//! adapter acknowledged the request, and every read-modify-write runs under
//! one async lock so concurrent lifecycles cannot double-start or
//! double-stop. The "all connected?" registry check happens under the same
//! lock as the start or stop it decides.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::adapter::{AdapterState, BleAdapter};
use crate::error::{BleError, Result};
use crate::registry::DeviceRegistry;
use solarmon_core::AllowList;

#[derive(Debug, Default)]
struct ScanState {
    active: bool,
    disabled_by: Option<AdapterState>,
}

/// Owns the global scan on/off state.
pub struct ScanCoordinator<A> {
    adapter: Arc<A>,
    state: Mutex<ScanState>,
    active: AtomicBool,
}

impl<A: BleAdapter> ScanCoordinator<A> {
    /// Create a coordinator; scanning starts on the first power-on.
    pub fn new(adapter: Arc<A>) -> Self {
        Self {
            adapter,
            state: Mutex::new(ScanState::default()),
            active: AtomicBool::new(false),
        }
    }

    /// Whether the adapter acknowledged an active scan.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Start scanning unless already scanning.
    ///
    /// # Errors
    ///
    /// Returns `BleError::AdapterUnavailable` if the adapter reported a
    /// terminal state, or the adapter's error if the request failed; the
    /// scan is then still considered inactive.
    pub async fn ensure_scanning(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.start_locked(&mut state).await
    }

    /// Stop scanning unless already stopped.
    ///
    /// # Errors
    ///
    /// Returns the adapter's error if the request failed; the scan is then
    /// still considered active.
    pub async fn ensure_stopped(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state).await
    }

    async fn start_locked(&self, state: &mut ScanState) -> Result<()> {
        if let Some(reason) = state.disabled_by {
            return Err(BleError::adapter_unavailable(reason));
        }
        if state.active {
            return Ok(());
        }

        self.adapter.start_scan().await?;
        state.active = true;
        self.active.store(true, Ordering::Release);
        info!("Scanning started");
        Ok(())
    }

    async fn stop_locked(&self, state: &mut ScanState) -> Result<()> {
        if !state.active {
            return Ok(());
        }

        self.adapter.stop_scan().await?;
        state.active = false;
        self.active.store(false, Ordering::Release);
        info!("Scanning stopped");
        Ok(())
    }

    /// React to an adapter state change.
    pub async fn on_adapter_state(&self, adapter_state: AdapterState) {
        match adapter_state {
            AdapterState::PoweredOn => {
                self.state.lock().await.disabled_by = None;
                if let Err(e) = self.ensure_scanning().await {
                    warn!("Failed to start scanning: {}", e);
                }
            }
            state if state.is_terminal() => {
                let mut scan = self.state.lock().await;
                scan.disabled_by = Some(state);
                scan.active = false;
                self.active.store(false, Ordering::Release);
                error!("Bluetooth adapter {}; scanning disabled", state);
            }
            state => debug!("Adapter state {}", state),
        }
    }

    /// A device reached the ready state.
    ///
    /// Stops scanning once every allow-listed device is connected, and keeps
    /// scanning otherwise. The registry is read under the scan lock, so the
    /// last device to connect always has the final word.
    pub async fn on_device_connected(&self, registry: &DeviceRegistry, allow_list: &AllowList) {
        let mut state = self.state.lock().await;
        let result = if registry.all_devices_connected(allow_list) {
            info!("All {} allowed devices connected", allow_list.len());
            self.stop_locked(&mut state).await
        } else {
            self.start_locked(&mut state).await
        };
        if let Err(e) = result {
            warn!("Scan update after connect failed: {}", e);
        }
    }

    /// A device left the ready state or gave up connecting.
    pub async fn on_device_disconnected(&self) {
        if let Err(e) = self.ensure_scanning().await {
            warn!("Failed to resume scanning: {}", e);
        }
    }
}
