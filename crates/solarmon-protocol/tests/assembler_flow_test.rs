//! Integration tests for the notification-to-frame flow.
//!
//! These tests drive the assembler the way a connected device does: frames are
//! split into MTU-sized packets and fed in order, sometimes interleaved with
//! noise, truncated frames, or corrupted checksums.

mod common;

use rstest::rstest;
use solarmon_core::Error;
use solarmon_protocol::{
    AssemblerState, Command, CommandCode, FrameAssembler, FramePayload, FrameType, checksum,
};

// ============================================================================
// Test Data Constants
// ============================================================================

mod test_data {
    /// Four populated cells of a 4S pack.
    pub const PACK_4S: [f64; 4] = [3.301, 3.298, 3.305, 3.300];

    /// Average of [`PACK_4S`].
    pub const PACK_4S_AVERAGE: f64 = 3.301;

    /// Tolerance for voltages that went through millivolt quantisation.
    pub const VOLTAGE_EPSILON: f64 = 0.0005;
}

/// Feed every packet and collect the completed frames.
fn feed_all(assembler: &mut FrameAssembler, packets: &[&[u8]]) -> Vec<solarmon_protocol::DecodedFrame> {
    packets
        .iter()
        .filter_map(|packet| assembler.push(packet).ok().flatten())
        .collect()
}

// ============================================================================
// Reassembly
// ============================================================================

#[rstest]
#[case::large_mtu(244)]
#[case::default_mtu(common::DEFAULT_MTU)]
#[case::minimum_ble_mtu(20)]
fn test_cell_info_reassembled_from_packets(#[case] mtu: usize) {
    use test_data::*;

    let frame = common::cell_info_frame(&PACK_4S);
    let mut assembler = FrameAssembler::new();

    let frames = feed_all(&mut assembler, &common::packets(&frame, mtu));
    assert_eq!(frames.len(), 1);

    let FramePayload::CellInfo(info) = &frames[0].payload else {
        panic!("expected cell info, got {:?}", frames[0].payload);
    };
    let average = info.average().expect("populated cells");
    assert!((average - PACK_4S_AVERAGE).abs() < VOLTAGE_EPSILON);
    assert_eq!(info.populated().count(), 4);
}

#[test]
fn test_back_to_back_frames_of_each_type() {
    let mut assembler = FrameAssembler::new();
    let settings = common::settings_frame(16, 3.45);
    let cells = common::cell_info_frame(&[3.2; 16]);
    let device = common::device_info_frame("JK_B2A24S15P", "4052304019", "V11.48", "11.XW");

    let mut packets = common::packets(&settings, common::DEFAULT_MTU);
    packets.extend(common::packets(&cells, common::DEFAULT_MTU));
    packets.extend(common::packets(&device, common::DEFAULT_MTU));

    let frames = feed_all(&mut assembler, &packets);
    let types: Vec<FrameType> = frames.iter().map(|f| f.frame_type).collect();
    assert_eq!(
        types,
        vec![FrameType::Settings, FrameType::CellInfo, FrameType::DeviceInfo]
    );

    let FramePayload::Settings(s) = &frames[0].payload else {
        panic!("expected settings");
    };
    assert_eq!(s.cell_count, 16);

    let FramePayload::DeviceInfo(d) = &frames[2].payload else {
        panic!("expected device info");
    };
    assert_eq!(d.device_name, "JK_B2A24S15P");
    assert_eq!(d.firmware_version, "V11.48");
}

#[test]
fn test_noise_before_first_frame_is_ignored() {
    let mut assembler = FrameAssembler::new();
    let frame = common::cell_info_frame(&test_data::PACK_4S);

    assert!(assembler.push(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap().is_none());
    assert!(assembler.buffered().is_empty());

    let frames = feed_all(&mut assembler, &common::packets(&frame, common::DEFAULT_MTU));
    assert_eq!(frames.len(), 1);
    assert_eq!(assembler.stats().stray_packets, 1);
}

#[test]
fn test_truncated_frame_superseded_by_next_start() {
    let mut assembler = FrameAssembler::new();
    let first = common::cell_info_frame(&[3.0; 4]);
    let second = common::cell_info_frame(&test_data::PACK_4S);

    // Only the first two packets of the first frame arrive.
    let mut packets = common::packets(&first, common::DEFAULT_MTU)[..2].to_vec();
    packets.extend(common::packets(&second, common::DEFAULT_MTU));

    let frames = feed_all(&mut assembler, &packets);
    assert_eq!(frames.len(), 1);
    let FramePayload::CellInfo(info) = &frames[0].payload else {
        panic!("expected cell info");
    };
    assert!((info.voltages[0] - 3.301).abs() < test_data::VOLTAGE_EPSILON);
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_corrupt_checksum_discards_frame_and_recovers() {
    let mut assembler = FrameAssembler::new();
    let mut bad = common::cell_info_frame(&test_data::PACK_4S);
    common::corrupt_checksum(&mut bad);
    let good = common::cell_info_frame(&test_data::PACK_4S);

    let packets = common::packets(&bad, common::DEFAULT_MTU);
    let (last, head) = packets.split_last().unwrap();
    for packet in head {
        assert!(assembler.push(packet).unwrap().is_none());
    }
    let result = assembler.push(last);
    assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
    assert!(assembler.buffered().is_empty());
    assert_eq!(assembler.state(), AssemblerState::WaitingStart);

    let frames = feed_all(&mut assembler, &common::packets(&good, common::DEFAULT_MTU));
    assert_eq!(frames.len(), 1);
    assert!(frames[0].crc_valid);
}

#[test]
fn test_unknown_frame_type_decodes_without_payload() {
    let mut assembler = FrameAssembler::new();
    let mut frame = common::blank_frame(0x7F);
    common::seal(&mut frame);

    let frames = feed_all(&mut assembler, &common::packets(&frame, common::DEFAULT_MTU));
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].frame_type, FrameType::Unknown(0x7F));
    assert_eq!(frames[0].payload, FramePayload::Unknown);

    let rejected = frames[0].clone().require_known();
    assert!(matches!(rejected, Err(Error::UnknownFrameType(0x7F))));
}

#[test]
fn test_empty_cell_frame_has_no_average() {
    let mut assembler = FrameAssembler::new();
    let frame = common::cell_info_frame(&[]);

    let frames = feed_all(&mut assembler, &[&frame]);
    let FramePayload::CellInfo(info) = &frames[0].payload else {
        panic!("expected cell info");
    };
    assert_eq!(info.average(), None);
}

// ============================================================================
// Commands
// ============================================================================

#[rstest]
#[case(CommandCode::DeviceInfo, 0x97, 0x11)]
#[case(CommandCode::CellInfo, 0x96, 0x10)]
fn test_init_command_wire_form(#[case] code: CommandCode, #[case] byte: u8, #[case] sum: u8) {
    let bytes = Command::new(code).encode();
    assert_eq!(bytes.len(), 20);
    assert_eq!(&bytes[..4], &[0xAA, 0x55, 0x90, 0xEB]);
    assert_eq!(bytes[4], byte);
    assert_eq!(bytes[19], sum);
    assert!(checksum::validate(&bytes));
}
