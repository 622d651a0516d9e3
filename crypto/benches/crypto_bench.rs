use criterion::{black_box, criterion_group, criterion_main, Criterion};
use orv_crypto::VerifyItem;

fn ed25519_sign_bench(c: &mut Criterion) {
    let kp = orv_crypto::generate_keypair();
    let msg = [42u8; 32];

    c.bench_function("ed25519_sign_32B", |b| {
        b.iter(|| orv_crypto::sign_message(black_box(&msg), &kp.private))
    });
}

fn ed25519_verify_bench(c: &mut Criterion) {
    let kp = orv_crypto::generate_keypair();
    let msg = [42u8; 32];
    let sig = orv_crypto::sign_message(&msg, &kp.private);

    c.bench_function("ed25519_verify_32B", |b| {
        b.iter(|| orv_crypto::verify_signature(black_box(&msg), &sig, &kp.public))
    });
}

fn batch_verify_bench(c: &mut Criterion) {
    let keys: Vec<_> = (0..256u32)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[..4].copy_from_slice(&i.to_be_bytes());
            orv_crypto::keypair_from_seed(&seed)
        })
        .collect();
    let messages: Vec<[u8; 32]> = (0..256u32)
        .map(|i| orv_crypto::blake2b_256(&i.to_be_bytes()))
        .collect();
    let signatures: Vec<_> = keys
        .iter()
        .zip(&messages)
        .map(|(kp, msg)| orv_crypto::sign_message(msg, &kp.private))
        .collect();
    let items: Vec<VerifyItem> = keys
        .iter()
        .zip(&messages)
        .zip(&signatures)
        .map(|((kp, msg), sig)| VerifyItem {
            message: msg,
            signature: sig,
            public_key: &kp.public,
        })
        .collect();

    c.bench_function("ed25519_verify_batch_256", |b| {
        b.iter(|| orv_crypto::verify_batch(black_box(&items)))
    });
}

fn blake2b_256_bench(c: &mut Criterion) {
    let data = [0xABu8; 256];

    c.bench_function("blake2b_256_256B", |b| {
        b.iter(|| orv_crypto::blake2b_256(black_box(&data)))
    });
}

criterion_group!(
    benches,
    ed25519_sign_bench,
    ed25519_verify_bench,
    batch_verify_bench,
    blake2b_256_bench
);
criterion_main!(benches);
