// Signing, key-derivation and request-authentication benchmarks.
//
// Covers Ed25519 signing and verification (plain and indexed), salty key
// stretching per Argon2 tier, threshold-checked event acceptance, and the
// full sign/verify cycle of an authenticated request.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use http::{HeaderMap, HeaderName, HeaderValue, Method};

use signify_protocol::authing::Authenticator;
use signify_protocol::config::{HEADER_RESOURCE, HEADER_TIMESTAMP};
use signify_protocol::crypto::{verify_indexed, Salter, Signer, Tier};
use signify_protocol::eventing::{incept, InceptArgs, KeyState};
use signify_protocol::keeping::{Keeper, KeyManager, SaltyOptions};

const MESSAGE: &[u8] = br#"{"v":"KERI10JSON000000_","t":"ixn","s":"1","a":[]}"#;

fn bench_sign_message(c: &mut Criterion) {
    let signer = Signer::from_seed(&[1u8; 32], true);
    c.bench_function("ed25519/sign", |b| b.iter(|| signer.sign(MESSAGE)));
    c.bench_function("ed25519/sign_indexed", |b| {
        b.iter(|| signer.sign_indexed(MESSAGE, 0, None).unwrap())
    });
}

fn bench_verify_signature(c: &mut Criterion) {
    let signer = Signer::from_seed(&[1u8; 32], true);
    let cigar = signer.sign(MESSAGE);
    c.bench_function("ed25519/verify", |b| b.iter(|| cigar.verify(MESSAGE)));
}

fn bench_verify_indexed(c: &mut Criterion) {
    let mut group = c.benchmark_group("ed25519/verify_indexed");

    for size in [1usize, 3, 7, 15] {
        let signers: Vec<Signer> = (0..size)
            .map(|i| Signer::from_seed(&[i as u8 + 1; 32], true))
            .collect();
        let verfers: Vec<_> = signers.iter().map(Signer::verfer).collect();
        let sigers: Vec<_> = signers
            .iter()
            .enumerate()
            .map(|(i, s)| s.sign_indexed(MESSAGE, i as u32, None).unwrap())
            .collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| verify_indexed(&sigers, &verfers, MESSAGE));
        });
    }

    group.finish();
}

fn bench_salty_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("salter/stretch");
    group.sample_size(10);

    for tier in [Tier::Temp, Tier::Low] {
        let salter = Salter::new([7u8; 16], tier);
        group.bench_with_input(BenchmarkId::from_parameter(tier), &salter, |b, salter| {
            b.iter(|| salter.signer("signify:aid00", true, None).unwrap());
        });
    }

    group.finish();
}

fn bench_signed_inception(c: &mut Criterion) {
    let controller = Salter::new([9u8; 16], Tier::Temp);
    let mut keeper = KeyManager::new(&controller)
        .new_salty(
            0,
            SaltyOptions {
                tier: Tier::Temp,
                count: 3,
                ncount: 3,
                ..SaltyOptions::default()
            },
        )
        .unwrap();
    let keys = keeper.incept(true).unwrap();
    let event = incept(InceptArgs {
        keys: keys.keys,
        ndigs: keys.ndigs,
        ..InceptArgs::default()
    })
    .unwrap();
    let raw = event.raw().unwrap();
    let sigers: Vec<_> = keeper
        .sign(&raw, true)
        .unwrap()
        .iter()
        .map(|s| signify_protocol::crypto::Siger::from_qb64(s).unwrap())
        .collect();

    c.bench_function("kel/incept_signed_3_keys", |b| {
        b.iter(|| KeyState::incept_signed(&event, &sigers).unwrap());
    });
}

fn bench_request_authentication(c: &mut Criterion) {
    let client = Signer::from_seed(&[3u8; 32], true);
    let agent = Signer::from_seed(&[4u8; 32], true);
    let client_pre = client.verfer().qb64();
    let client_key = client.verfer();
    let agent_pre = agent.verfer().qb64();
    let agent_key = agent.verfer();

    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(HEADER_RESOURCE),
        HeaderValue::from_str(&client_pre).unwrap(),
    );
    headers.insert(
        HeaderName::from_static(HEADER_TIMESTAMP),
        HeaderValue::from_static("2024-01-01T00:00:00.000000+00:00"),
    );

    let signing = Authenticator::new(&client, &agent_pre, &agent_key);
    let verifying = Authenticator::new(&agent, &client_pre, &client_key);
    let signed = signing.sign(&headers, &Method::POST, "/identifiers").unwrap();

    c.bench_function("authing/sign_request", |b| {
        b.iter(|| signing.sign(&headers, &Method::POST, "/identifiers").unwrap());
    });
    c.bench_function("authing/verify_request", |b| {
        b.iter(|| verifying.verify(&signed, &Method::POST, "/identifiers").unwrap());
    });
}

criterion_group!(
    benches,
    bench_sign_message,
    bench_verify_signature,
    bench_verify_indexed,
    bench_salty_derivation,
    bench_signed_inception,
    bench_request_authentication,
);
criterion_main!(benches);
