//! Property-based tests for frame validation and reassembly.
//!
//! These tests use proptest to generate random frames and packet splits and
//! verify that the checksum, decoding, and buffer invariants hold for all of
//! them.

mod common;

use proptest::prelude::*;
use solarmon_core::constants::FRAME_LENGTH;
use solarmon_protocol::{FrameAssembler, FramePayload, checksum, decode_frame};

/// Strategy for generating cell voltages in the LiFePO4 operating range.
///
/// Values are whole millivolts so the expected decode is exact up to the
/// 1 mV quantisation of the wire format.
fn cell_voltages() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec((2500u16..=3650u16).prop_map(|mv| f64::from(mv) / 1000.0), 24)
}

/// Strategy for generating notification payload sizes.
fn mtu() -> impl Strategy<Value = usize> {
    20usize..=244usize
}

/// Strategy for generating arbitrary buffers of checksum-able length.
fn arbitrary_buffer() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 20..=FRAME_LENGTH)
}

proptest! {
    /// Property: A buffer validates exactly when its last byte is the sum of
    /// all preceding bytes modulo 256.
    #[test]
    fn prop_checksum_valid_iff_last_byte_matches(buffer in arbitrary_buffer()) {
        let last = buffer.len() - 1;
        let expected = buffer[..last]
            .iter()
            .fold(0u32, |acc, &b| acc + u32::from(b)) % 256;

        prop_assert_eq!(
            checksum::validate(&buffer),
            u32::from(buffer[last]) == expected
        );
    }

    /// Property: Sealing any buffer makes it validate.
    #[test]
    fn prop_sealed_buffer_validates(mut buffer in arbitrary_buffer()) {
        common::seal(&mut buffer);
        prop_assert!(checksum::validate(&buffer));
    }

    /// Property: Every encoded cell voltage decodes back within 0.5 mV.
    #[test]
    fn prop_cell_voltages_round_trip(voltages in cell_voltages()) {
        let frame = common::cell_info_frame(&voltages);
        let decoded = decode_frame(&frame).unwrap();

        prop_assert!(decoded.crc_valid);
        let FramePayload::CellInfo(info) = decoded.payload else {
            return Err(TestCaseError::fail("expected cell info payload"));
        };
        for (slot, (got, want)) in info.voltages.iter().zip(&voltages).enumerate() {
            prop_assert!((got - want).abs() <= 0.0005, "slot {}: {} vs {}", slot, got, want);
        }
    }

    /// Property: The packet size never changes what the assembler produces.
    #[test]
    fn prop_reassembly_independent_of_mtu(voltages in cell_voltages(), mtu in mtu()) {
        let frame = common::cell_info_frame(&voltages);
        let mut assembler = FrameAssembler::new();

        let mut completed = Vec::new();
        for packet in common::packets(&frame, mtu) {
            if let Some(decoded) = assembler.push(packet).unwrap() {
                completed.push(decoded);
            }
        }

        prop_assert_eq!(completed.len(), 1);
        prop_assert_eq!(&completed[0], &decode_frame(&frame).unwrap());
    }

    /// Property: After any frame completes, valid or not, the buffer is empty.
    #[test]
    fn prop_buffer_resets_after_completion(
        voltages in cell_voltages(),
        mtu in mtu(),
        corrupt in any::<bool>(),
    ) {
        let mut frame = common::cell_info_frame(&voltages);
        if corrupt {
            common::corrupt_checksum(&mut frame);
        }

        let mut assembler = FrameAssembler::new();
        let packets = common::packets(&frame, mtu);
        let (last, head) = packets.split_last().unwrap();
        for packet in head {
            let _ = assembler.push(packet);
            prop_assert!(!assembler.buffered().is_empty());
        }

        let result = assembler.push(last);
        prop_assert_eq!(result.is_err(), corrupt);
        prop_assert!(assembler.buffered().is_empty());
    }

    /// Property: Arbitrary packet sequences never panic and never grow the
    /// buffer past one frame.
    #[test]
    fn prop_arbitrary_packets_bounded(
        packets in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 0..20)
    ) {
        let mut assembler = FrameAssembler::new();
        for packet in &packets {
            let _ = assembler.push(packet);
            prop_assert!(assembler.buffered().len() < FRAME_LENGTH);
        }
    }
}
