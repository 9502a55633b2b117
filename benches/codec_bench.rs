use criterion::{black_box, criterion_group, criterion_main, Criterion};

use bytes::Bytes;
use vcwire::protocol::{Charset, FieldDecoder, FieldEncoder, FieldMap, Packet};

fn sample_fields(fields: usize) -> FieldMap {
    let mut map = FieldMap::new();
    for i in 0..fields {
        map.insert(
            Some(format!("depotFile{i}")),
            Bytes::from(format!("//depot/main/src/module/file_{i}.c")),
        );
    }
    map
}

fn bench_encode(c: &mut Criterion) {
    let encoder = FieldEncoder::new(Charset::Ascii);
    let map = sample_fields(50);

    c.bench_function("packet_encode_50_fields", |b| {
        b.iter(|| {
            let packet = Packet::from_fields(&encoder, black_box(&map));
            black_box(packet.to_wire())
        })
    });
}

fn bench_decode(c: &mut Criterion) {
    let encoder = FieldEncoder::new(Charset::Ascii);
    let payload = encoder.encode_fields(&sample_fields(50));

    c.bench_function("packet_decode_50_fields", |b| {
        b.iter(|| {
            let mut decoder = FieldDecoder::new(Charset::Ascii);
            black_box(decoder.decode(black_box(&payload), None).unwrap())
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
