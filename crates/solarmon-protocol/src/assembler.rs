//! Frame reassembly across notification packets.
//!
//! This module provides a stateful assembler that turns GATT notification
//! payloads into complete BMS frames. A frame is much larger than a single
//! notification, so the device delivers it as a run of packets: the first
//! carries the start sequence, the rest are bare continuations.
//!
//! # Protocol Framing
//!
//! ```text
//! packet 1: 55 AA EB 90 02 .. ..     (start sequence + type + data)
//! packet 2: .. .. .. ..              (continuation)
//! ...
//! packet n: .. .. CS                 (frame reaches 320 bytes)
//! ```
//!
//! There is no end marker. A frame is complete once [`FRAME_LENGTH`] bytes
//! have been accumulated; the trailing byte is the additive checksum.
//!
//! # Usage
//!
//! ```
//! use solarmon_protocol::{FrameAssembler, checksum};
//!
//! let mut frame = vec![0u8; 320];
//! frame[..5].copy_from_slice(&[0x55, 0xAA, 0xEB, 0x90, 0x02]);
//! frame[319] = checksum::checksum(&frame[..319]);
//!
//! let mut assembler = FrameAssembler::new();
//! assert!(assembler.push(&frame[..128]).unwrap().is_none());
//! assert!(assembler.push(&frame[128..256]).unwrap().is_none());
//!
//! let decoded = assembler.push(&frame[256..]).unwrap().unwrap();
//! assert!(decoded.crc_valid);
//! ```

use bytes::BytesMut;
use solarmon_core::Result;
use solarmon_core::constants::{FRAME_LENGTH, FRAME_START};
use tracing::trace;

use crate::checksum;
use crate::frame::{DecodedFrame, decode_frame};

/// State machine states for frame reassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    /// No frame in progress; waiting for a packet that begins with the
    /// start sequence. Continuation packets seen here are dropped.
    WaitingStart,

    /// A frame is in progress and continuation packets are appended.
    Accumulating,
}

/// Counters kept by the assembler, useful for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    /// Frames that passed the checksum and were decoded.
    pub frames_decoded: u64,

    /// Frames discarded because the checksum did not match.
    pub frames_rejected: u64,

    /// Partial frames dropped because a new start sequence arrived.
    pub partials_discarded: u64,

    /// Packets dropped because no frame was in progress.
    pub stray_packets: u64,
}

/// Stateful reassembler for BMS notification frames.
///
/// # State Machine
///
/// ```text
/// ┌─────────────┐  start seq.   ┌──────────────┐  len >= 320   ┌───────────────┐
/// │WaitingStart │──────────────>│ Accumulating │──────────────>│ checksum +    │
/// └─────────────┘               └──────────────┘               │ decode, reset │
///       ^  │                       │      ^                    └───────────────┘
///       │  │ continuation          │      │ start seq.                 │
///       │  │ (dropped)             │      │ (partial discarded,        │
///       │  └───────────────────────┘      │  buffer restarts)          │
///       │                                 └──────────                  │
///       └──────────────────────────────────────────────────────────────┘
/// ```
///
/// State transitions:
/// - WaitingStart → Accumulating: packet begins with [`FRAME_START`]
/// - Accumulating → Accumulating: packet begins with [`FRAME_START`]; the
///   partial frame is discarded and the buffer restarts with this packet
/// - Accumulating → WaitingStart: buffer reached [`FRAME_LENGTH`]; the frame
///   is validated, decoded if valid, and the buffer is emptied either way
///
/// The start sequence is only recognised at the beginning of a packet, never
/// in the middle of one.
#[derive(Debug)]
pub struct FrameAssembler {
    /// Accumulated bytes of the frame in progress.
    buffer: BytesMut,

    /// Current state of the state machine.
    state: AssemblerState,

    stats: AssemblerStats,
}

impl FrameAssembler {
    /// Create an assembler with room for one full frame.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(FRAME_LENGTH),
            state: AssemblerState::WaitingStart,
            stats: AssemblerStats::default(),
        }
    }

    /// Feed one notification payload.
    ///
    /// Returns `Ok(Some(frame))` when this packet completed a valid frame,
    /// `Ok(None)` while more packets are needed (or the packet was dropped).
    ///
    /// # Errors
    ///
    /// When a completed frame fails validation the frame is discarded, the
    /// buffer is reset, and the reason is returned:
    /// - `Error::ChecksumMismatch` if the trailing byte does not match
    /// - `Error::InvalidFrame` if the frame could not be decoded
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<DecodedFrame>> {
        if chunk.starts_with(&FRAME_START) {
            if self.state == AssemblerState::Accumulating {
                trace!(
                    "Discarding partial frame of {} bytes on new start sequence",
                    self.buffer.len()
                );
                self.stats.partials_discarded += 1;
            }
            self.buffer.clear();
            self.state = AssemblerState::Accumulating;
        } else if self.state == AssemblerState::WaitingStart {
            trace!("Dropping {} byte packet with no frame in progress", chunk.len());
            self.stats.stray_packets += 1;
            return Ok(None);
        }

        self.buffer.extend_from_slice(chunk);

        if self.buffer.len() < FRAME_LENGTH {
            return Ok(None);
        }

        self.complete_frame()
    }

    /// Validate and decode the frame held in the buffer, then reset.
    fn complete_frame(&mut self) -> Result<Option<DecodedFrame>> {
        if self.buffer.len() > FRAME_LENGTH {
            trace!(
                "Dropping {} surplus bytes past frame end",
                self.buffer.len() - FRAME_LENGTH
            );
        }
        let frame = self.buffer.split_to(FRAME_LENGTH);
        self.reset();

        if let Err(e) = checksum::verify(&frame) {
            self.stats.frames_rejected += 1;
            return Err(e);
        }

        let decoded = decode_frame(&frame)?;
        self.stats.frames_decoded += 1;
        Ok(Some(decoded))
    }

    /// Bytes of the frame currently in progress.
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Diagnostic counters.
    #[must_use]
    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    /// Drop any frame in progress.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = AssemblerState::WaitingStart;
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solarmon_core::Error;
    use solarmon_core::constants::{FRAME_TYPE_CELL_INFO, FRAME_TYPE_OFFSET};

    /// Test helper: a valid cell info frame with a recognisable body.
    fn make_frame(fill: u8) -> Vec<u8> {
        let mut frame = vec![fill; FRAME_LENGTH];
        frame[..4].copy_from_slice(&FRAME_START);
        frame[FRAME_TYPE_OFFSET] = FRAME_TYPE_CELL_INFO;
        frame[FRAME_LENGTH - 1] = checksum::checksum(&frame[..FRAME_LENGTH - 1]);
        frame
    }

    #[test]
    fn test_new_assembler() {
        let assembler = FrameAssembler::new();
        assert_eq!(assembler.state(), AssemblerState::WaitingStart);
        assert!(assembler.buffered().is_empty());
    }

    #[test]
    fn test_complete_frame_single_packet() {
        let mut assembler = FrameAssembler::new();
        let decoded = assembler.push(&make_frame(0)).unwrap().unwrap();
        assert!(decoded.crc_valid);
        assert_eq!(assembler.state(), AssemblerState::WaitingStart);
        assert_eq!(assembler.stats().frames_decoded, 1);
    }

    #[test]
    fn test_partial_frame_multiple_packets() {
        let mut assembler = FrameAssembler::new();
        let frame = make_frame(0x01);

        for chunk in frame[..300].chunks(20) {
            assert!(assembler.push(chunk).unwrap().is_none());
        }
        assert_eq!(assembler.buffered().len(), 300);
        assert_eq!(assembler.state(), AssemblerState::Accumulating);

        assert!(assembler.push(&frame[300..]).unwrap().is_some());
        assert!(assembler.buffered().is_empty());
    }

    #[test]
    fn test_byte_by_byte_feeding() {
        let mut assembler = FrameAssembler::new();
        let frame = make_frame(0x02);

        // The first packet must carry the whole start sequence.
        assert!(assembler.push(&frame[..4]).unwrap().is_none());
        let mut completed = None;
        for byte in &frame[4..] {
            if let Some(decoded) = assembler.push(std::slice::from_ref(byte)).unwrap() {
                completed = Some(decoded);
            }
        }
        assert!(completed.is_some());
    }

    #[test]
    fn test_new_start_discards_partial() {
        let mut assembler = FrameAssembler::new();
        let stale = make_frame(0x0A);
        let fresh = make_frame(0x0B);

        assembler.push(&stale[..100]).unwrap();
        assembler.push(&fresh[..60]).unwrap();

        assert_eq!(assembler.buffered(), &fresh[..60]);
        assert_eq!(assembler.stats().partials_discarded, 1);
    }

    #[test]
    fn test_stray_continuation_dropped() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.push(&[0x01, 0x02, 0x03]).unwrap().is_none());
        assert!(assembler.buffered().is_empty());
        assert_eq!(assembler.stats().stray_packets, 1);
    }

    #[test]
    fn test_checksum_mismatch_resets_buffer() {
        let mut assembler = FrameAssembler::new();
        let mut frame = make_frame(0x03);
        frame[FRAME_LENGTH - 1] = frame[FRAME_LENGTH - 1].wrapping_add(1);

        let result = assembler.push(&frame);
        assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
        assert!(assembler.buffered().is_empty());
        assert_eq!(assembler.state(), AssemblerState::WaitingStart);
        assert_eq!(assembler.stats().frames_rejected, 1);

        // The next frame is unaffected.
        assert!(assembler.push(&make_frame(0x04)).unwrap().is_some());
    }

    #[test]
    fn test_surplus_bytes_are_discarded() {
        let mut assembler = FrameAssembler::new();
        let mut data = make_frame(0x05);
        data.extend_from_slice(&[0xEE; 12]);

        assert!(assembler.push(&data).unwrap().is_some());
        assert!(assembler.buffered().is_empty());
    }

    #[test]
    fn test_start_sequence_mid_packet_is_not_a_boundary() {
        let mut assembler = FrameAssembler::new();
        let frame = make_frame(0x06);

        assembler.push(&frame[..10]).unwrap();
        let mut continuation = vec![0x00, 0x00];
        continuation.extend_from_slice(&FRAME_START);
        assembler.push(&continuation).unwrap();

        assert_eq!(assembler.buffered().len(), 16);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut assembler = FrameAssembler::new();
        assembler.push(&make_frame(0x07)[..50]).unwrap();
        assembler.reset();
        assert_eq!(assembler.state(), AssemblerState::WaitingStart);
        assert!(assembler.buffered().is_empty());
    }
}
