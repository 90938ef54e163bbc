//! Outbound command encoding.
//!
//! Commands are fixed 20-byte writes to the data characteristic. They start
//! with [`COMMAND_HEADER`], which is the inbound start sequence byte-swapped
//! pairwise, and end with the additive checksum.
//!
//! # Wire Format
//!
//! ```text
//! offset  0..4   AA 55 90 EB    header
//! offset  4      CC             command code
//! offset  5      LL             length (0x00 for every known request)
//! offset  6..10  VV VV VV VV    value, little-endian (zero for requests)
//! offset 10..19  00 x 9         padding
//! offset 19      CS             checksum of bytes 0..19
//! ```
//!
//! # Examples
//!
//! ```
//! use solarmon_protocol::{Command, CommandCode};
//!
//! let bytes = Command::new(CommandCode::DeviceInfo).encode();
//! assert_eq!(&bytes[..6], &[0xAA, 0x55, 0x90, 0xEB, 0x97, 0x00]);
//! assert_eq!(bytes[19], 0x11);
//! ```

use crate::checksum::checksum;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use solarmon_core::config::InitCommand;
use solarmon_core::constants::{
    COMMAND_CELL_INFO, COMMAND_DEVICE_INFO, COMMAND_HEADER, COMMAND_LENGTH,
};
use std::fmt;

/// Offset of the checksum byte in a command.
const CHECKSUM_OFFSET: usize = COMMAND_LENGTH - 1;

/// Known command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandCode {
    /// Ask the device for a device information frame (`0x97`).
    DeviceInfo,

    /// Ask the device to start streaming cell information frames (`0x96`).
    CellInfo,
}

impl CommandCode {
    /// Wire value of this command.
    #[inline]
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            CommandCode::DeviceInfo => COMMAND_DEVICE_INFO,
            CommandCode::CellInfo => COMMAND_CELL_INFO,
        }
    }
}

impl From<InitCommand> for CommandCode {
    fn from(command: InitCommand) -> Self {
        match command {
            InitCommand::DeviceInfo => CommandCode::DeviceInfo,
            InitCommand::CellInfo => CommandCode::CellInfo,
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CommandCode::DeviceInfo => write!(f, "DeviceInfo(0x97)"),
            CommandCode::CellInfo => write!(f, "CellInfo(0x96)"),
        }
    }
}

/// Outbound request. Requests carry no value, so the length and value
/// fields are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    code: CommandCode,
}

impl Command {
    /// Create a request.
    #[must_use]
    pub fn new(code: CommandCode) -> Self {
        Self { code }
    }

    /// Encode into the 20-byte wire form, checksum included.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(COMMAND_LENGTH);
        buffer.put_slice(&COMMAND_HEADER);
        buffer.put_u8(self.code.to_u8());
        buffer.put_bytes(0, CHECKSUM_OFFSET - buffer.len());

        let sum = checksum(&buffer);
        buffer.put_u8(sum);
        buffer.freeze()
    }
}
