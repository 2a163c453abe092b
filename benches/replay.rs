//! Benchmarks for the counter and wire codec hot paths.
//!
//! Run with: cargo bench --bench replay

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use emberlink::counter::PeerCounter;
use emberlink::wire::{PacketFlags, PacketHeader, PayloadHeader};
use emberlink::{NodeId, SessionId};

/// Pre-populate a window that has seen `n` sequential counters.
fn populated_counter(n: u32) -> PeerCounter {
    let mut counter = PeerCounter::new();
    counter.set_counter(0);
    for value in 1..=n {
        counter.commit(value);
    }
    counter
}

// ===== Replay Window Benchmarks =====

fn bench_verify(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_verify");

    let counter = populated_counter(10_000);

    // in-order counter ahead of the window
    group.bench_function("ahead", |b| {
        b.iter(|| counter.verify(black_box(10_001)))
    });

    // out-of-order counter inside the window, unseen
    group.bench_function("in_window", |b| {
        let mut sparse = PeerCounter::new();
        sparse.set_counter(10_000);
        b.iter(|| sparse.verify(black_box(9_990)))
    });

    // replayed counter inside the window
    group.bench_function("duplicate", |b| {
        b.iter(|| counter.verify(black_box(9_990)))
    });

    group.finish();
}

fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_commit");

    group.bench_function("sequential", |b| {
        let mut counter = populated_counter(1);
        let mut next = 2u32;
        b.iter(|| {
            counter.commit(black_box(next));
            next = next.wrapping_add(1);
        })
    });

    group.finish();
}

// ===== Wire Codec Benchmarks =====

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire_codec");

    let packet_header = PacketHeader {
        flags: PacketFlags {
            encrypted: true,
            ..Default::default()
        },
        session_id: SessionId::new(7),
        message_counter: 0x1234_5678,
        security_flags: 1,
        source_node_id: Some(NodeId::new(0xABCD)),
        destination_node_id: None,
    };
    let packet_bytes = packet_header.encode();

    group.bench_function("packet_encode", |b| {
        b.iter(|| black_box(&packet_header).encode())
    });
    group.bench_function("packet_decode", |b| {
        b.iter(|| PacketHeader::decode_and_consume(black_box(&packet_bytes)))
    });

    let payload_header = PayloadHeader {
        needs_ack: true,
        message_type: 0x42,
        exchange_id: 1,
        protocol_id: 2,
        ack_counter: Some(99),
        ..Default::default()
    };
    let payload_bytes = payload_header.encode();

    group.bench_function("payload_encode", |b| {
        b.iter(|| black_box(&payload_header).encode())
    });
    group.bench_function("payload_decode", |b| {
        b.iter(|| PayloadHeader::decode_and_consume(black_box(&payload_bytes)))
    });

    group.finish();
}

criterion_group!(benches, bench_verify, bench_commit, bench_codec);
criterion_main!(benches);
