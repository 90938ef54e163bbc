//! Common test utilities for integration tests.
//!
//! Frame builders shared by the protocol integration and property tests.
//! Frames are built the way a BMS sends them: a full 320-byte frame, sealed
//! with the additive checksum, then cut into notification-sized packets.
//!
//! # Usage Examples
//!
//! ```ignore
//! use crate::common;
//!
//! let frame = common::cell_info_frame(&[3.301, 3.298, 3.305, 3.300]);
//! for packet in common::packets(&frame, common::DEFAULT_MTU) {
//!     assembler.push(packet)?;
//! }
//! ```

#![allow(dead_code)]

use solarmon_core::constants::{
    CELL_VOLTAGE_OFFSET, DEVICE_INFO_FIRMWARE, DEVICE_INFO_HARDWARE, DEVICE_INFO_NAME,
    DEVICE_INFO_SERIAL, FRAME_LENGTH, FRAME_START, FRAME_TYPE_CELL_INFO, FRAME_TYPE_DEVICE_INFO,
    FRAME_TYPE_OFFSET, FRAME_TYPE_SETTINGS, SETTINGS_CELL_COUNT_OFFSET,
    SETTINGS_START_BALANCE_OFFSET,
};
use solarmon_protocol::checksum;
use std::ops::Range;

/// Typical notification payload size seen from these devices.
pub const DEFAULT_MTU: usize = 128;

/// A 320-byte frame with the start sequence and type byte set, unsealed.
pub fn blank_frame(frame_type: u8) -> Vec<u8> {
    let mut frame = vec![0u8; FRAME_LENGTH];
    frame[..FRAME_START.len()].copy_from_slice(&FRAME_START);
    frame[FRAME_TYPE_OFFSET] = frame_type;
    frame
}

/// Write the checksum into the last byte.
pub fn seal(frame: &mut [u8]) {
    let last = frame.len() - 1;
    frame[last] = checksum::checksum(&frame[..last]);
}

/// Sealed cell info frame. Voltages are rounded to whole millivolts.
pub fn cell_info_frame(voltages: &[f64]) -> Vec<u8> {
    let mut frame = blank_frame(FRAME_TYPE_CELL_INFO);
    for (slot, volts) in voltages.iter().enumerate() {
        let millivolts = (volts * 1000.0).round() as u16;
        let offset = CELL_VOLTAGE_OFFSET + slot * 2;
        frame[offset..offset + 2].copy_from_slice(&millivolts.to_le_bytes());
    }
    seal(&mut frame);
    frame
}

/// Sealed settings frame.
pub fn settings_frame(cell_count: u8, start_balance_voltage: f32) -> Vec<u8> {
    let mut frame = blank_frame(FRAME_TYPE_SETTINGS);
    frame[SETTINGS_CELL_COUNT_OFFSET] = cell_count;
    frame[SETTINGS_START_BALANCE_OFFSET..SETTINGS_START_BALANCE_OFFSET + 4]
        .copy_from_slice(&start_balance_voltage.to_le_bytes());
    seal(&mut frame);
    frame
}

/// Sealed device info frame.
pub fn device_info_frame(name: &str, serial: &str, firmware: &str, hardware: &str) -> Vec<u8> {
    let mut frame = blank_frame(FRAME_TYPE_DEVICE_INFO);
    put_text(&mut frame, DEVICE_INFO_NAME, name);
    put_text(&mut frame, DEVICE_INFO_SERIAL, serial);
    put_text(&mut frame, DEVICE_INFO_FIRMWARE, firmware);
    put_text(&mut frame, DEVICE_INFO_HARDWARE, hardware);
    seal(&mut frame);
    frame
}

fn put_text(frame: &mut [u8], range: Range<usize>, text: &str) {
    let bytes = text.as_bytes();
    let len = bytes.len().min(range.len());
    frame[range.start..range.start + len].copy_from_slice(&bytes[..len]);
}

/// Split a frame into notification packets of at most `mtu` bytes.
pub fn packets(frame: &[u8], mtu: usize) -> Vec<&[u8]> {
    frame.chunks(mtu).collect()
}

/// Flip the checksum byte so the frame no longer validates.
pub fn corrupt_checksum(frame: &mut [u8]) {
    let last = frame.len() - 1;
    frame[last] = frame[last].wrapping_add(1);
}
