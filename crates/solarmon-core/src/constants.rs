//! Core constants for the BMS notification protocol and device handling.
//!
//! This module defines the protocol-level constants shared by the frame
//! assembler, the command encoder and the connection lifecycle, together with
//! the default tunables used when the configuration file leaves them out.
//!
//! # Protocol Structure
//!
//! Inbound frames (device → host) are delivered over GATT notifications,
//! usually split across several packets:
//!
//! ```text
//! 55 AA EB 90 | TT | ... payload ... | CS
//! ^^^^^^^^^^^   ^^                     ^^
//! start seq.    frame type             additive checksum (byte 319)
//! ```
//!
//! Outbound commands (host → device) are single 20-byte writes:
//!
//! ```text
//! AA 55 90 EB | CC | LL | 00 x 13 | CS
//! ^^^^^^^^^^^   ^^   ^^             ^^
//! header        cmd  length         additive checksum (byte 19)
//! ```
//!
//! Note that the command header is the byte-swapped start sequence. This is
//! how the devices speak and must be preserved as is.
//!
//! # Usage
//!
//! ```
//! use solarmon_core::constants::*;
//!
//! assert_eq!(FRAME_LENGTH, 320);
//! assert_eq!(COMMAND_LENGTH, 20);
//! assert_ne!(FRAME_START, COMMAND_HEADER);
//! ```

// ============================================================================
// Frame Layout
// ============================================================================

/// Start sequence of every inbound frame, as notified by the device.
pub const FRAME_START: [u8; 4] = [0x55, 0xAA, 0xEB, 0x90];

/// Header of every outbound command.
///
/// Byte-swapped relative to [`FRAME_START`].
pub const COMMAND_HEADER: [u8; 4] = [0xAA, 0x55, 0x90, 0xEB];

/// Total length of a complete inbound frame, checksum included.
pub const FRAME_LENGTH: usize = 320;

/// Total length of an outbound command, checksum included.
pub const COMMAND_LENGTH: usize = 20;

/// Buffers shorter than this cannot carry a meaningful checksum.
pub const MIN_CHECKSUM_LENGTH: usize = 20;

/// Offset of the frame-type discriminator.
pub const FRAME_TYPE_OFFSET: usize = 4;

// ============================================================================
// Frame Types
// ============================================================================

/// Settings frame discriminator.
pub const FRAME_TYPE_SETTINGS: u8 = 0x01;

/// Cell information frame discriminator.
pub const FRAME_TYPE_CELL_INFO: u8 = 0x02;

/// Device information frame discriminator.
pub const FRAME_TYPE_DEVICE_INFO: u8 = 0x03;

// ============================================================================
// Settings Frame Fields
// ============================================================================

/// Offset of the configured cell count (u8).
pub const SETTINGS_CELL_COUNT_OFFSET: usize = 34;

/// Offset of the start balance voltage (f32, little-endian).
pub const SETTINGS_START_BALANCE_OFFSET: usize = 98;

// ============================================================================
// Cell Info Frame Fields
// ============================================================================

/// Number of fixed cell voltage slots in a cell info frame.
pub const CELL_SLOTS: usize = 24;

/// Offset of the first cell voltage slot (u16 millivolts, little-endian).
pub const CELL_VOLTAGE_OFFSET: usize = 6;

/// Scale from raw cell slot value to volts.
pub const CELL_VOLTAGE_SCALE: f64 = 0.001;

// ============================================================================
// Device Info Frame Fields
// ============================================================================

/// Device name text field range.
pub const DEVICE_INFO_NAME: std::ops::Range<usize> = 5..35;

/// Serial number text field range.
pub const DEVICE_INFO_SERIAL: std::ops::Range<usize> = 35..55;

/// Firmware version text field range.
pub const DEVICE_INFO_FIRMWARE: std::ops::Range<usize> = 55..75;

/// Hardware version text field range.
pub const DEVICE_INFO_HARDWARE: std::ops::Range<usize> = 75..95;

// ============================================================================
// Command Codes
// ============================================================================

/// Request a device information frame.
pub const COMMAND_DEVICE_INFO: u8 = 0x97;

/// Request cell information frames.
pub const COMMAND_CELL_INFO: u8 = 0x96;

// ============================================================================
// GATT
// ============================================================================

/// BMS data characteristic (notify + write), 16-bit short form.
pub const DEFAULT_DATA_CHARACTERISTIC: u32 = 0xffe1;

/// Standard Battery Level characteristic, 16-bit short form.
pub const DEFAULT_BATTERY_LEVEL_CHARACTERISTIC: u32 = 0x2a19;

// ============================================================================
// Signal Strength
// ============================================================================

/// RSSI at or above which a signal is considered strong (dBm).
pub const RSSI_STRONG: i16 = -60;

/// RSSI at or above which a signal is considered medium (dBm).
pub const RSSI_MEDIUM: i16 = -80;

// ============================================================================
// Default Tunables
// ============================================================================

/// Initial connect attempts before a device is marked failed.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;

/// First delay of the capped exponential connect backoff (ms).
pub const DEFAULT_CONNECT_INITIAL_DELAY_MS: u64 = 2_000;

/// Upper bound of the connect backoff (ms).
pub const DEFAULT_CONNECT_MAX_DELAY_MS: u64 = 10_000;

/// Reconnect attempts after an unsolicited disconnect.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 2;

/// Fixed delay between reconnect attempts (ms).
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2_000;

/// Maximum number of devices establishing a connection at the same time.
pub const DEFAULT_MAX_CONCURRENT_CONNECTS: usize = 4;

/// How long a failed device is ignored by discovery (ms).
pub const DEFAULT_FAILED_COOLDOWN_MS: u64 = 60_000;

/// Delay between consecutive initialization commands (ms).
pub const DEFAULT_COMMAND_INTERVAL_MS: u64 = 1_000;

/// Battery level (percent) below which `battery.low` is raised.
pub const DEFAULT_BATTERY_LOW_THRESHOLD: u8 = 20;

/// Minimum spacing between average voltage reports per device (ms).
pub const DEFAULT_VOLTAGE_REPORT_INTERVAL_MS: u64 = 60_000;
