pub mod assembler;
pub mod checksum;
pub mod command;
pub mod frame;

pub use assembler::{AssemblerState, AssemblerStats, FrameAssembler};
pub use checksum::{checksum, validate, verify};
pub use command::{Command, CommandCode};
pub use frame::{
    CellInfo, DecodedFrame, DeviceInfo, FramePayload, FrameType, Settings, decode_frame,
};
