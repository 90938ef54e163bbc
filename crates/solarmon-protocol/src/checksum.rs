//! Additive checksum used by both frame directions.
//!
//! The last byte of every frame and every command is the sum of all the
//! preceding bytes, modulo 256:
//!
//! ```text
//! checksum = (b[0] + b[1] + ... + b[n-2]) mod 256 == b[n-1]
//! ```
//!
//! Buffers shorter than [`MIN_CHECKSUM_LENGTH`] are rejected before any
//! arithmetic: nothing that short is a real frame.
//!
//! # Examples
//!
//! ```
//! use solarmon_protocol::checksum;
//!
//! let mut buffer = vec![0x11u8; 20];
//! buffer[19] = checksum::checksum(&buffer[..19]);
//! assert!(checksum::validate(&buffer));
//!
//! buffer[19] ^= 0xFF;
//! assert!(!checksum::validate(&buffer));
//! ```

use solarmon_core::{Error, Result, constants::MIN_CHECKSUM_LENGTH};

/// Sum of all bytes, modulo 256.
#[inline]
#[must_use]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Returns `true` if the trailing byte matches the sum of the rest.
///
/// Always `false` for buffers under [`MIN_CHECKSUM_LENGTH`] bytes.
#[must_use]
pub fn validate(buffer: &[u8]) -> bool {
    verify(buffer).is_ok()
}

/// Check the trailing checksum byte and report why it failed.
///
/// # Errors
///
/// - `Error::FrameTooShort` if the buffer is under [`MIN_CHECKSUM_LENGTH`] bytes
/// - `Error::ChecksumMismatch` if the trailing byte differs from the computed sum
pub fn verify(buffer: &[u8]) -> Result<()> {
    if buffer.len() < MIN_CHECKSUM_LENGTH {
        return Err(Error::FrameTooShort { len: buffer.len() });
    }

    let (body, trailer) = buffer.split_at(buffer.len() - 1);
    let expected = checksum(body);
    let actual = trailer[0];

    if expected != actual {
        return Err(Error::ChecksumMismatch { expected, actual });
    }
    Ok(())
}
