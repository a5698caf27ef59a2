// Self-addressing digest benchmarks.
//
// Measures saidify and verify over event-sized and credential-sized maps for
// both supported digest algorithms, plus building a complete inception.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Map, Value};

use signify_protocol::crypto::{MatterCode, Signer};
use signify_protocol::eventing::{incept, InceptArgs};
use signify_protocol::said::Saider;

fn attributes(count: usize) -> Value {
    let mut map = Map::new();
    map.insert("v".into(), json!("ACDC10JSON000000_"));
    map.insert("d".into(), json!(""));
    for i in 0..count {
        map.insert(format!("field{i:03}"), json!(format!("value-{i}")));
    }
    Value::Object(map)
}

fn bench_saidify(c: &mut Criterion) {
    let mut group = c.benchmark_group("said/saidify");

    for fields in [4usize, 32, 256] {
        let value = attributes(fields);
        group.throughput(Throughput::Elements(fields as u64));
        for (name, code) in [
            ("blake3", MatterCode::Blake3Digest),
            ("sha256", MatterCode::Sha256Digest),
        ] {
            group.bench_with_input(BenchmarkId::new(name, fields), &value, |b, value| {
                b.iter(|| Saider::saidify(value, code, "d").unwrap());
            });
        }
    }

    group.finish();
}

fn bench_verify(c: &mut Criterion) {
    let (value, _) = Saider::saidify(&attributes(32), MatterCode::Blake3Digest, "d").unwrap();
    c.bench_function("said/verify_32_fields", |b| {
        b.iter(|| Saider::verify(&value, "d").unwrap());
    });
}

fn bench_inception(c: &mut Criterion) {
    let key = Signer::from_seed(&[5u8; 32], true).verfer().qb64();
    let next = Signer::from_seed(&[6u8; 32], true).verfer();
    let ndigs = signify_protocol::eventing::next_digests(MatterCode::Blake3Digest, &[next]).unwrap();

    c.bench_function("said/incept_single_key", |b| {
        b.iter(|| {
            incept(InceptArgs {
                keys: vec![key.clone()],
                ndigs: ndigs.clone(),
                ..InceptArgs::default()
            })
            .unwrap()
        });
    });
}

criterion_group!(benches, bench_saidify, bench_verify, bench_inception);
criterion_main!(benches);
