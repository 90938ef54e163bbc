use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Protocol errors
    #[error("Frame too short: {len} bytes")]
    FrameTooShort { len: usize },

    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Unknown frame type: {0:#04x}")]
    UnknownFrameType(u8),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    // Identity errors
    #[error("Invalid UUID: {0}")]
    InvalidUuid(String),

    #[error("Invalid allowed device: {0}")]
    InvalidAllowedDevice(String),

    #[error("Duplicate allowed device: {0}")]
    DuplicateAllowedDevice(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing configuration key: {0}")]
    MissingConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
