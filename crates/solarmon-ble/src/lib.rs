//! Bluetooth Low Energy connection layer for solarmon.
//!
//! This crate turns advertisements from a BLE adapter into live, subscribed
//! connections to the battery management systems named in the allow-list,
//! and turns the notifications those devices send into domain events.
//!
//! # Architecture
//!
//! - [`adapter::BleAdapter`] is the seam to the radio. The [`mock`] adapter
//!   drives everything in tests; the `btleplug` feature enables the host
//!   Bluetooth stack.
//! - [`manager::DeviceManager`] consumes adapter events, admits allow-listed
//!   devices and spawns one lifecycle task per device.
//! - [`lifecycle::ConnectionLifecycle`] connects, discovers, subscribes and
//!   streams frames for one device, with bounded retry and reconnect.
//! - [`registry::DeviceRegistry`] is the single shared table of tracked
//!   devices; admission is atomic so a device never gets two lifecycles.
//! - [`scan::ScanCoordinator`] keeps the adapter scanning exactly while an
//!   allowed device is missing.
//!
//! ```text
//! BleAdapter ──events──► DeviceManager ──spawn──► ConnectionLifecycle (per device)
//!                              │                        │
//!                              ▼                        ▼
//!                  DeviceRegistry + ScanCoordinator   DomainEvent ──► ManagerHandle
//! ```
//!
//! # Async Traits
//!
//! Adapter methods use native `async fn` in traits (Rust 1.90 + Edition 2024
//! RPITIT); no `async-trait` boxing is involved.
//!
//! # Error Handling
//!
//! Per-device failures never cross task boundaries. They are logged, counted
//! in the registry and turned into lifecycle transitions. Only
//! [`DeviceManager::new`], [`DeviceManager::start`] and
//! [`ManagerHandle::shutdown`] return errors to the caller.

#[cfg(feature = "btleplug")]
pub mod backend;

pub mod adapter;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod mock;
pub mod registry;
pub mod retry;
pub mod scan;

// Re-export commonly used types for convenience
pub use adapter::{AdapterEvent, AdapterState, BleAdapter, Notification};
pub use error::{BleError, Result};
pub use lifecycle::{LifecycleOutcome, LifecycleState};
pub use manager::{DeviceManager, ManagerHandle};
pub use registry::{DeviceRegistry, EntryState, RegistryEntry};
pub use retry::RetryPolicy;
pub use scan::ScanCoordinator;

#[cfg(feature = "btleplug")]
pub use backend::BtleplugAdapter;
