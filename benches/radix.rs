use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use globtrie::config::{Config, Fit};
use globtrie::radix;
use globtrie::{GlobTrieNode, Key};
use rand::prelude::*;

fn random_keys(n: usize, seed: u64) -> Vec<u128> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen()).collect()
}

fn clustered_keys(n: usize, seed: u64) -> Vec<u128> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let cluster: u128 = rng.gen_range(0..64);
            (cluster << 122) | rng.gen_range(0..4096)
        })
        .collect()
}

fn split_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("radix_split");

    for &n in &[64usize, 256, 1024, 4096] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("best/uniform", n), &n, |b, &n| {
            let keys = random_keys(n, 42);
            b.iter_batched(
                || keys.clone(),
                |mut keys| black_box(radix::best(&mut keys, Key::default())),
                criterion::BatchSize::SmallInput,
            )
        });
        group.bench_with_input(BenchmarkId::new("first/uniform", n), &n, |b, &n| {
            let keys = random_keys(n, 42);
            b.iter_batched(
                || keys.clone(),
                |mut keys| black_box(radix::first(&mut keys, Key::default())),
                criterion::BatchSize::SmallInput,
            )
        });
        group.bench_with_input(BenchmarkId::new("best/clustered", n), &n, |b, &n| {
            let keys = clustered_keys(n, 42);
            b.iter_batched(
                || keys.clone(),
                |mut keys| black_box(radix::best(&mut keys, Key::default())),
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn trie_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("glob_trie");

    for &n in &[10_000usize, 100_000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("insert/uniform", n), &n, |b, &n| {
            let keys = random_keys(n, 7);
            let config = Config::default();
            b.iter_batched(
                || keys.clone(),
                |keys| {
                    let mut trie = GlobTrieNode::new(Key::default());
                    for k in keys {
                        trie.insert(k, &config).unwrap();
                    }
                    trie
                },
                criterion::BatchSize::SmallInput,
            )
        });
        group.bench_with_input(BenchmarkId::new("insert/clustered/first-fit", n), &n, |b, &n| {
            let keys = clustered_keys(n, 7);
            let config = Config {
                local_fit: Fit::First,
                factor: 32,
                ..Config::default()
            };
            b.iter_batched(
                || keys.clone(),
                |keys| {
                    let mut trie = GlobTrieNode::new(Key::default());
                    for k in keys {
                        trie.insert(k, &config).unwrap();
                    }
                    trie
                },
                criterion::BatchSize::SmallInput,
            )
        });
        group.bench_with_input(BenchmarkId::new("find/uniform", n), &n, |b, &n| {
            let keys = random_keys(n, 7);
            let config = Config::default();
            let mut trie = GlobTrieNode::new(Key::default());
            for &k in &keys {
                trie.insert(k, &config).unwrap();
            }
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % keys.len();
                black_box(trie.find(keys[i]))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, split_benchmark, trie_benchmark);
criterion_main!(benches);
