//! Mock adapter implementation for testing and development.
//!
//! This module provides a simulated BLE adapter and scripted peripherals that
//! can be controlled programmatically without requiring a radio.

pub mod adapter;
pub mod peripheral;

// Re-export commonly used types
pub use adapter::{MockAdapter, MockAdapterHandle, WriteRecord};
pub use peripheral::MockPeripheral;
