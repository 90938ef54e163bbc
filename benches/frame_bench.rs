//! Performance benchmarks for frame reassembly and decoding.
//!
//! A pack streams a cell info frame roughly once per second per device, so
//! these numbers mostly matter for spotting regressions in the hot path.
//!
//! Run benchmarks with:
//! ```sh
//! cargo bench --bench frame_bench
//! ```

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use solarmon_core::constants::{CELL_VOLTAGE_OFFSET, FRAME_LENGTH, FRAME_START, FRAME_TYPE_CELL_INFO};
use solarmon_protocol::{Command, CommandCode, FrameAssembler, checksum, decode_frame};
use std::hint::black_box;

/// Build a sealed cell info frame with all 24 slots populated.
fn create_cell_frame() -> Vec<u8> {
    let mut frame = vec![0u8; FRAME_LENGTH];
    frame[..4].copy_from_slice(&FRAME_START);
    frame[4] = FRAME_TYPE_CELL_INFO;
    for slot in 0..24 {
        let offset = CELL_VOLTAGE_OFFSET + slot * 2;
        let millivolts = 3300u16 + slot as u16;
        frame[offset..offset + 2].copy_from_slice(&millivolts.to_le_bytes());
    }
    frame[FRAME_LENGTH - 1] = checksum::checksum(&frame[..FRAME_LENGTH - 1]);
    frame
}

/// Benchmark checksum validation of a full frame.
fn bench_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("checksum");
    group.throughput(Throughput::Bytes(FRAME_LENGTH as u64));

    let frame = create_cell_frame();
    group.bench_function("validate_frame", |b| {
        b.iter(|| black_box(checksum::validate(black_box(&frame))));
    });

    group.finish();
}

/// Benchmark decoding a complete cell info frame.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));

    let frame = create_cell_frame();
    group.bench_function("decode_cell_info", |b| {
        b.iter(|| black_box(decode_frame(black_box(&frame)).unwrap()));
    });

    group.finish();
}

/// Benchmark reassembly across common notification sizes.
fn bench_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembly");
    group.throughput(Throughput::Elements(1));

    let frame = create_cell_frame();
    for mtu in [20usize, 128, 244] {
        group.bench_with_input(BenchmarkId::from_parameter(mtu), &mtu, |b, &mtu| {
            let mut assembler = FrameAssembler::new();
            b.iter(|| {
                let mut out = None;
                for packet in frame.chunks(mtu) {
                    if let Some(decoded) = assembler.push(black_box(packet)).unwrap() {
                        out = Some(decoded);
                    }
                }
                black_box(out)
            });
        });
    }

    group.finish();
}

/// Benchmark command encoding.
fn bench_command(c: &mut Criterion) {
    c.bench_function("encode_device_info_command", |b| {
        b.iter(|| black_box(Command::new(black_box(CommandCode::DeviceInfo)).encode()));
    });
}

criterion_group!(
    benches,
    bench_checksum,
    bench_decode,
    bench_reassembly,
    bench_command
);
criterion_main!(benches);
