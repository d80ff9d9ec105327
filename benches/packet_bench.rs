use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use netmesh::core::attribute::{decode, serialize};
use netmesh::core::codec::PacketCodec;
use netmesh::core::packet::{MAX_PACKET_SIZE, PACKET_OVERHEAD};
use netmesh::{format_type, packet_object, Packet};
use tokio_util::codec::{Decoder, Encoder};

fn packet(payload_len: usize, hops: usize) -> Packet {
    Packet {
        packet_type: format_type("BNCH"),
        ttl: 16,
        source: 1,
        destination: 200,
        resend_chain: (1..=hops as u8).collect(),
        payload: vec![0xA5; payload_len],
    }
}

#[allow(clippy::unwrap_used)]
fn bench_packet_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_encode_decode");
    let hops = 4;
    let payload_sizes = [0usize, 64, 256, MAX_PACKET_SIZE - PACKET_OVERHEAD - hops];

    for &size in &payload_sizes {
        group.throughput(Throughput::Bytes((size + PACKET_OVERHEAD + hops) as u64));
        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter_batched(
                || packet(size, hops),
                |p| {
                    let mut buf = BytesMut::with_capacity(MAX_PACKET_SIZE);
                    let mut codec = PacketCodec;
                    codec.encode(p, &mut buf).unwrap();
                },
                BatchSize::SmallInput,
            )
        });

        let bytes = packet(size, hops).to_bytes().unwrap();
        group.bench_function(format!("decode_{size}b"), |b| {
            b.iter(|| {
                let decoded = Packet::from_bytes(&bytes);
                assert!(decoded.is_ok());
            })
        });
        group.bench_function(format!("stream_decode_{size}b"), |b| {
            b.iter_batched(
                || BytesMut::from(&bytes[..]),
                |mut buf| {
                    let mut codec = PacketCodec;
                    assert!(codec.decode(&mut buf).unwrap().is_some());
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

#[derive(Default)]
struct Telemetry {
    sequence: u32,
    temperature: f32,
    label: String,
    samples: Vec<i16>,
}

packet_object!(Telemetry => "TELE" {
    sequence: u32,
    temperature: f32,
    label: String,
    samples: Vec<i16>,
});

#[allow(clippy::unwrap_used)]
fn bench_attribute_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("attribute_serialization");
    let value = Telemetry {
        sequence: 42,
        temperature: 21.5,
        label: "sensor-north-07".into(),
        samples: (0..128).collect(),
    };

    group.bench_function("serialize", |b| b.iter(|| serialize(&value).unwrap()));
    let bytes = serialize(&value).unwrap();
    group.bench_function("deserialize", |b| {
        b.iter(|| decode::<Telemetry>(&bytes).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_packet_encode_decode, bench_attribute_serialization);
criterion_main!(benches);
