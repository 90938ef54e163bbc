//! Inbound frame types and decoders.
//!
//! A complete frame is [`FRAME_LENGTH`] bytes long, starts with
//! [`FRAME_START`] and carries its type at byte 4:
//!
//! | Type   | Frame        | Decoded fields                                      |
//! |--------|--------------|-----------------------------------------------------|
//! | `0x01` | Settings     | cell count (u8 @ 34), start balance voltage (f32 LE @ 98) |
//! | `0x02` | Cell info    | 24 cell slots (u16 LE millivolts @ 6, stride 2)     |
//! | `0x03` | Device info  | name, serial, firmware, hardware (text @ 5/35/55/75) |
//!
//! Any other type decodes to [`FrameType::Unknown`] with no payload; callers
//! log and discard those.
//!
//! # Examples
//!
//! ```
//! use solarmon_protocol::{FrameType, checksum, decode_frame};
//!
//! let mut frame = vec![0u8; 320];
//! frame[..4].copy_from_slice(&[0x55, 0xAA, 0xEB, 0x90]);
//! frame[4] = 0x02;
//! frame[6..8].copy_from_slice(&3300u16.to_le_bytes());
//! frame[319] = checksum::checksum(&frame[..319]);
//!
//! let decoded = decode_frame(&frame).unwrap();
//! assert_eq!(decoded.frame_type, FrameType::CellInfo);
//! assert!(decoded.crc_valid);
//! ```

use crate::checksum;
use serde::Serialize;
use solarmon_core::constants::*;
use solarmon_core::{Error, Result};
use std::fmt;
use std::ops::Range;

/// Frame type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FrameType {
    Settings,
    CellInfo,
    DeviceInfo,
    Unknown(u8),
}

impl FrameType {
    /// Map the type byte onto a frame type.
    #[inline]
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            FRAME_TYPE_SETTINGS => FrameType::Settings,
            FRAME_TYPE_CELL_INFO => FrameType::CellInfo,
            FRAME_TYPE_DEVICE_INFO => FrameType::DeviceInfo,
            other => FrameType::Unknown(other),
        }
    }

    /// Returns `true` for the three known frame types.
    #[inline]
    #[must_use]
    pub fn is_known(self) -> bool {
        !matches!(self, FrameType::Unknown(_))
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrameType::Settings => write!(f, "Settings"),
            FrameType::CellInfo => write!(f, "CellInfo"),
            FrameType::DeviceInfo => write!(f, "DeviceInfo"),
            FrameType::Unknown(code) => write!(f, "Unknown({code:#04x})"),
        }
    }
}

/// Settings frame fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Settings {
    pub cell_count: u8,
    pub start_balance_voltage: f32,
}

/// Cell voltages in volts, one per fixed slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CellInfo {
    pub voltages: [f64; CELL_SLOTS],
}

impl CellInfo {
    /// Populated cells as `(cell number, volts)`, numbered from 1.
    ///
    /// Empty slots read 0 V and are skipped.
    pub fn populated(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.voltages
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > 0.0)
            .map(|(i, v)| (i + 1, *v))
    }

    /// Mean of the populated cell voltages, `None` if no cell reads above 0 V.
    #[must_use]
    pub fn average(&self) -> Option<f64> {
        let (count, sum) = self
            .populated()
            .fold((0usize, 0.0f64), |(n, s), (_, v)| (n + 1, s + v));
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }
}

/// Device information text fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub device_name: String,
    pub serial_number: String,
    pub firmware_version: String,
    pub hardware_version: String,
}

/// Structured payload of a decoded frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FramePayload {
    Settings(Settings),
    CellInfo(CellInfo),
    DeviceInfo(DeviceInfo),
    Unknown,
}

/// Decoded frame, consumed once by the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedFrame {
    pub frame_type: FrameType,
    pub payload: FramePayload,
    pub crc_valid: bool,
}

impl DecodedFrame {
    /// Reject frames of unknown type.
    ///
    /// # Errors
    /// Returns `Error::UnknownFrameType` with the raw type byte.
    pub fn require_known(self) -> Result<Self> {
        match self.frame_type {
            FrameType::Unknown(code) => Err(Error::UnknownFrameType(code)),
            _ => Ok(self),
        }
    }
}

/// Decode one complete frame.
///
/// The checksum is evaluated and reported in [`DecodedFrame::crc_valid`];
/// decoding does not depend on it.
///
/// # Errors
///
/// - `Error::InvalidFrame` if the start sequence is missing or a field lies
///   beyond the end of the buffer
pub fn decode_frame(bytes: &[u8]) -> Result<DecodedFrame> {
    if bytes.len() <= FRAME_TYPE_OFFSET || bytes[..FRAME_START.len()] != FRAME_START {
        return Err(Error::InvalidFrame("missing start sequence".to_string()));
    }

    let frame_type = FrameType::from_u8(bytes[FRAME_TYPE_OFFSET]);
    let payload = match frame_type {
        FrameType::Settings => FramePayload::Settings(decode_settings(bytes)?),
        FrameType::CellInfo => FramePayload::CellInfo(decode_cell_info(bytes)?),
        FrameType::DeviceInfo => FramePayload::DeviceInfo(decode_device_info(bytes)?),
        FrameType::Unknown(_) => FramePayload::Unknown,
    };

    Ok(DecodedFrame {
        frame_type,
        payload,
        crc_valid: checksum::validate(bytes),
    })
}

/// Decode the settings fields.
///
/// # Errors
/// Returns `Error::InvalidFrame` if the buffer is too short.
pub fn decode_settings(bytes: &[u8]) -> Result<Settings> {
    let cell_count = *bytes
        .get(SETTINGS_CELL_COUNT_OFFSET)
        .ok_or_else(|| truncated("settings cell count"))?;
    let raw = field::<4>(bytes, SETTINGS_START_BALANCE_OFFSET, "start balance voltage")?;

    Ok(Settings {
        cell_count,
        start_balance_voltage: f32::from_le_bytes(raw),
    })
}

/// Decode the 24 cell voltage slots.
///
/// # Errors
/// Returns `Error::InvalidFrame` if the buffer is too short.
pub fn decode_cell_info(bytes: &[u8]) -> Result<CellInfo> {
    let mut voltages = [0.0f64; CELL_SLOTS];
    for (slot, voltage) in voltages.iter_mut().enumerate() {
        let raw = field::<2>(bytes, CELL_VOLTAGE_OFFSET + slot * 2, "cell voltage")?;
        *voltage = f64::from(u16::from_le_bytes(raw)) * CELL_VOLTAGE_SCALE;
    }
    Ok(CellInfo { voltages })
}

/// Decode the device information text fields.
///
/// # Errors
/// Returns `Error::InvalidFrame` if the buffer is too short.
pub fn decode_device_info(bytes: &[u8]) -> Result<DeviceInfo> {
    Ok(DeviceInfo {
        device_name: text(bytes, DEVICE_INFO_NAME)?,
        serial_number: text(bytes, DEVICE_INFO_SERIAL)?,
        firmware_version: text(bytes, DEVICE_INFO_FIRMWARE)?,
        hardware_version: text(bytes, DEVICE_INFO_HARDWARE)?,
    })
}

fn field<const N: usize>(bytes: &[u8], offset: usize, name: &str) -> Result<[u8; N]> {
    bytes
        .get(offset..offset + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| truncated(name))
}

fn text(bytes: &[u8], range: Range<usize>) -> Result<String> {
    let raw = bytes
        .get(range)
        .ok_or_else(|| truncated("device info text"))?;
    Ok(String::from_utf8_lossy(raw)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string())
}

fn truncated(field: &str) -> Error {
    Error::InvalidFrame(format!("frame too short for {field}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_frame(frame_type: u8) -> Vec<u8> {
        let mut frame = vec![0u8; FRAME_LENGTH];
        frame[..4].copy_from_slice(&FRAME_START);
        frame[FRAME_TYPE_OFFSET] = frame_type;
        frame
    }

    fn seal(frame: &mut [u8]) {
        let last = frame.len() - 1;
        frame[last] = checksum::checksum(&frame[..last]);
    }

    #[test]
    fn test_decode_settings() {
        let mut frame = blank_frame(FRAME_TYPE_SETTINGS);
        frame[SETTINGS_CELL_COUNT_OFFSET] = 16;
        frame[SETTINGS_START_BALANCE_OFFSET..SETTINGS_START_BALANCE_OFFSET + 4]
            .copy_from_slice(&3.4f32.to_le_bytes());
        seal(&mut frame);

        let decoded = decode_frame(&frame).unwrap();
        assert!(decoded.crc_valid);
        match decoded.payload {
            FramePayload::Settings(settings) => {
                assert_eq!(settings.cell_count, 16);
                assert!((settings.start_balance_voltage - 3.4).abs() < f32::EPSILON);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_decode_cell_info() {
        let mut frame = blank_frame(FRAME_TYPE_CELL_INFO);
        for slot in 0..4 {
            let mv = 3300u16 + slot as u16 * 10;
            let offset = CELL_VOLTAGE_OFFSET + slot * 2;
            frame[offset..offset + 2].copy_from_slice(&mv.to_le_bytes());
        }
        seal(&mut frame);

        let decoded = decode_frame(&frame).unwrap();
        let FramePayload::CellInfo(cells) = decoded.payload else {
            panic!("expected cell info");
        };
        assert!((cells.voltages[0] - 3.300).abs() < 1e-9);
        assert!((cells.voltages[3] - 3.330).abs() < 1e-9);
        assert_eq!(cells.voltages[4], 0.0);

        let populated: Vec<_> = cells.populated().map(|(n, _)| n).collect();
        assert_eq!(populated, vec![1, 2, 3, 4]);
        assert!((cells.average().unwrap() - 3.315).abs() < 1e-9);
    }

    #[test]
    fn test_average_of_empty_cells() {
        let cells = CellInfo {
            voltages: [0.0; CELL_SLOTS],
        };
        assert!(cells.average().is_none());
    }

    #[test]
    fn test_decode_device_info() {
        let mut frame = blank_frame(FRAME_TYPE_DEVICE_INFO);
        frame[5..11].copy_from_slice(b"JK_B2A");
        frame[35..43].copy_from_slice(b"40442111");
        frame[55..60].copy_from_slice(b"11.XW");
        frame[75..78].copy_from_slice(b"11A");
        seal(&mut frame);

        let decoded = decode_frame(&frame).unwrap();
        let FramePayload::DeviceInfo(info) = decoded.payload else {
            panic!("expected device info");
        };
        assert_eq!(info.device_name, "JK_B2A");
        assert_eq!(info.serial_number, "40442111");
        assert_eq!(info.firmware_version, "11.XW");
        assert_eq!(info.hardware_version, "11A");
    }

    #[test]
    fn test_unknown_frame_type() {
        let mut frame = blank_frame(0x7F);
        seal(&mut frame);

        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.frame_type, FrameType::Unknown(0x7F));
        assert_eq!(decoded.payload, FramePayload::Unknown);
        assert!(matches!(
            decoded.require_known(),
            Err(Error::UnknownFrameType(0x7F))
        ));
    }

    #[test]
    fn test_crc_flag_reflects_trailer() {
        let mut frame = blank_frame(FRAME_TYPE_CELL_INFO);
        frame[10] = 0x42;
        seal(&mut frame);
        frame[FRAME_LENGTH - 1] = frame[FRAME_LENGTH - 1].wrapping_add(1);

        assert!(!decode_frame(&frame).unwrap().crc_valid);
    }

    #[test]
    fn test_missing_start_sequence() {
        let frame = vec![0u8; FRAME_LENGTH];
        assert!(matches!(decode_frame(&frame), Err(Error::InvalidFrame(_))));
        assert!(matches!(decode_frame(&[0x55, 0xAA]), Err(Error::InvalidFrame(_))));
    }

    #[test]
    fn test_truncated_cell_info() {
        let frame = blank_frame(FRAME_TYPE_CELL_INFO);
        assert!(matches!(
            decode_frame(&frame[..20]),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_frame_type_display() {
        assert_eq!(FrameType::CellInfo.to_string(), "CellInfo");
        assert_eq!(FrameType::Unknown(0x10).to_string(), "Unknown(0x10)");
        assert!(!FrameType::Unknown(0x10).is_known());
    }
}
