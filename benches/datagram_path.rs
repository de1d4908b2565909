use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

use lan_audio_receiver::audio::buffer::jitter_buffer;
use lan_audio_receiver::protocol::{decode, encode_header, StreamFormat, MAX_PAYLOAD};

fn datagram() -> Vec<u8> {
    let mut bytes = encode_header(&StreamFormat::INITIAL).unwrap().to_vec();
    bytes.extend((0..MAX_PAYLOAD).map(|i| i as u8));
    bytes
}

fn bench_decode(c: &mut Criterion) {
    let bytes = datagram();
    c.bench_function("decode_datagram", |b| {
        b.iter(|| decode(black_box(&bytes)).unwrap())
    });
}

fn bench_push_drain(c: &mut Criterion) {
    let bytes = datagram();
    let (mut writer, mut reader) = jitter_buffer(
        Duration::from_millis(500),
        &StreamFormat::INITIAL,
        Default::default(),
    );
    let mut out = vec![0u8; MAX_PAYLOAD];

    c.bench_function("jitter_push_drain", |b| {
        b.iter(|| {
            let decoded = decode(&bytes).unwrap();
            writer.push(black_box(decoded.payload));
            reader.pop_into(black_box(&mut out))
        })
    });
}

criterion_group!(benches, bench_decode, bench_push_drain);
criterion_main!(benches);
