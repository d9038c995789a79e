use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pq_dtls::{
    core::{
        crypto::kdf,
        message::ContentType,
        record::{RecordKeys, RecordLayer},
    },
    CipherSuite, KeyExchange, KeyExchangeAlgorithm, SymmetricAlgorithm,
};

const VERSION: u16 = 0xfefd;

fn benchmark_key_exchange(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_exchange");

    for algorithm in [
        KeyExchangeAlgorithm::X25519,
        KeyExchangeAlgorithm::Kyber512,
        KeyExchangeAlgorithm::Kyber768,
        KeyExchangeAlgorithm::Kyber1024,
        KeyExchangeAlgorithm::X25519Kyber768,
    ] {
        let kex = KeyExchange::new(algorithm);

        group.bench_with_input(BenchmarkId::new("keypair", algorithm), &kex, |b, kex| {
            b.iter(|| black_box(kex.generate_keypair().unwrap()));
        });

        let keypair = kex.generate_keypair().unwrap();
        group.bench_with_input(BenchmarkId::new("encapsulate", algorithm), &kex, |b, kex| {
            b.iter(|| black_box(kex.encapsulate(keypair.public_key()).unwrap()));
        });

        let encapsulation = kex.encapsulate(keypair.public_key()).unwrap();
        group.bench_with_input(BenchmarkId::new("decapsulate", algorithm), &kex, |b, kex| {
            b.iter(|| black_box(kex.decapsulate_with(&encapsulation.ciphertext, &keypair).unwrap()));
        });
    }

    group.finish();
}

fn benchmark_record_protection(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_protection");

    for algorithm in [
        SymmetricAlgorithm::Aes128Gcm,
        SymmetricAlgorithm::Aes256Gcm,
        SymmetricAlgorithm::ChaCha20Poly1305,
    ] {
        for size in [64usize, 512, 1350] {
            let payload = vec![0x42u8; size];
            group.throughput(Throughput::Bytes(size as u64));

            group.bench_with_input(
                BenchmarkId::new(format!("seal/{}", algorithm), size),
                &payload,
                |b, payload| {
                    b.iter_with_setup(
                        || {
                            let mut layer = RecordLayer::new(VERSION);
                            let keys =
                                RecordKeys::new(algorithm, &vec![7u8; algorithm.key_len()], &[1u8; 12]).unwrap();
                            layer.install_write_keys(1, keys).unwrap();
                            layer
                        },
                        |mut layer| {
                            let mut out = Vec::with_capacity(size + 64);
                            layer.write_record(ContentType::ApplicationData, payload, &mut out).unwrap();
                            black_box(out)
                        },
                    );
                },
            );

            let keys = RecordKeys::new(algorithm, &vec![7u8; algorithm.key_len()], &[1u8; 12]).unwrap();
            let sealed = pq_dtls::core::record::seal(ContentType::ApplicationData, VERSION, &payload, 1, 0, &keys).unwrap();
            let header = pq_dtls::core::message::RecordHeader::new(
                ContentType::ApplicationData,
                VERSION,
                1,
                0,
                sealed.len() as u16,
            );
            group.bench_with_input(
                BenchmarkId::new(format!("open/{}", algorithm), size),
                &sealed,
                |b, sealed| {
                    b.iter(|| black_box(pq_dtls::core::record::open(&header, sealed, &keys).unwrap()));
                },
            );
        }
    }

    group.finish();
}

fn benchmark_key_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_schedule");
    let client_random = [1u8; 32];
    let server_random = [2u8; 32];
    let shared = [3u8; 64];

    group.bench_function("master_secret", |b| {
        b.iter(|| black_box(kdf::master_secret(&shared, &client_random, &server_random).unwrap()));
    });

    let master = kdf::master_secret(&shared, &client_random, &server_random).unwrap();
    for suite in [CipherSuite::X25519_AES_128_GCM_SHA256, CipherSuite::X25519_KYBER768_AES_256_GCM_SHA384] {
        let len = suite.key_material().key_block_len();
        group.bench_with_input(BenchmarkId::new("key_block", suite.name), &len, |b, &len| {
            b.iter(|| black_box(kdf::key_block(&master, &client_random, &server_random, len).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_key_exchange,
    benchmark_record_protection,
    benchmark_key_schedule
);
criterion_main!(benches);
