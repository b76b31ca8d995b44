use globtrie::config::{Config, Fit};
use globtrie::ingest::swizzle;
use globtrie::pipeline::{self, Run};
use std::io::Write;

fn mmio_file(edges: &[(u64, u64)]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "%%MatrixMarket matrix coordinate pattern general").unwrap();
    let n = edges.iter().map(|e| e.0.max(e.1)).max().unwrap_or(1);
    writeln!(file, "{n} {n} {}", edges.len()).unwrap();
    for (a, b) in edges {
        writeln!(file, "{a} {b}").unwrap();
    }
    file.flush().unwrap();
    file
}

fn key(a: u64, b: u64) -> u128 {
    ((swizzle(a) as u128) << 64) | swizzle(b) as u128
}

/// Deterministic pseudo-random edges with plenty of duplicated endpoints.
fn synthetic_edges(n: usize) -> Vec<(u64, u64)> {
    let mut state = 0x2545f491_4f6cdd1du64;
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let a = (state >> 33) % 512 + 1;
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let b = (state >> 33) % 8192 + 1;
            (a, b)
        })
        .collect()
}

#[test]
fn trivial_two_edge_run() {
    let file = mmio_file(&[(1, 2), (3, 4)]);
    let run = Run::default();
    let config = Config::default();

    let index = pipeline::run(file.path(), &run, &config).unwrap();
    assert_eq!(index.report.produced, 2);
    assert_eq!(index.report.inserted, 2);
    assert!(index.contains(key(1, 2)));
    assert!(index.contains(key(3, 4)));
    assert!(!index.contains(key(2, 1)));

    assert_eq!(pipeline::validate(file.path(), &run, &index).unwrap(), 2);
}

#[test]
fn empty_input_drains_immediately() {
    let file = mmio_file(&[]);
    let run = Run::default();
    let index = pipeline::run(file.path(), &run, &Config::default()).unwrap();
    assert_eq!(index.report.produced, 0);
    assert_eq!(index.report.inserted, 0);
    assert_eq!(pipeline::validate(file.path(), &run, &index).unwrap(), 0);
}

#[test]
fn every_producer_partition_is_covered() {
    let edges: Vec<(u64, u64)> = (1..=10).map(|i| (i, i + 1)).collect();
    let file = mmio_file(&edges);
    let run = Run {
        n_producers: 4,
        ..Run::default()
    };
    let index = pipeline::run(file.path(), &run, &Config::default()).unwrap();
    assert_eq!(index.report.produced, 10);
    for (a, b) in &edges {
        assert!(index.contains(key(*a, *b)));
    }
    assert_eq!(pipeline::validate(file.path(), &run, &index).unwrap(), 10);
}

#[test]
fn n_edges_caps_each_producer() {
    let edges: Vec<(u64, u64)> = (1..=100).map(|i| (i, i)).collect();
    let file = mmio_file(&edges);
    let run = Run {
        n_producers: 2,
        n_edges: 10,
        ..Run::default()
    };
    let index = pipeline::run(file.path(), &run, &Config::default()).unwrap();
    assert_eq!(index.report.produced, 10);
    assert_eq!(pipeline::validate(file.path(), &run, &index).unwrap(), 10);
}

#[test]
fn multithreaded_run_with_migration() {
    let edges = synthetic_edges(5000);
    let file = mmio_file(&edges);
    let run = Run {
        n_producers: 3,
        n_consumers: 2,
        n_services: 4,
        queue_size: 64,
        n_edges: u64::MAX,
    };
    // Small globs force constant splitting; bubbling at the source/target
    // boundary lets full source prefixes migrate. Shallower thresholds are
    // unsafe: a sub-64-bit ejection is owned by its source bits, which can
    // disagree forever with a deeper published route.
    let config = Config {
        glob_capacity: 8,
        factor: 16,
        bubble: 64,
        local_fit: Fit::Best,
        global_fit: Fit::Best,
        ..Config::default()
    };

    let index = pipeline::run(file.path(), &run, &config).unwrap();
    // Without an edge cap the producers stream their whole partitions.
    let expected = 5000;
    assert_eq!(index.report.produced, expected);
    // Migrated keys are inserted again at their new owner, so the insert
    // count can only exceed the produced count.
    assert!(index.report.inserted >= index.report.produced);

    for (a, b) in &edges {
        assert!(index.contains(key(*a, *b)), "lost edge ({a}, {b})");
    }
    assert_eq!(
        pipeline::validate(file.path(), &run, &index).unwrap(),
        expected
    );
}

#[test]
fn first_fit_and_deep_factoring_agree() {
    let edges = synthetic_edges(2000);
    let file = mmio_file(&edges);
    let run = Run {
        n_producers: 2,
        n_consumers: 2,
        n_services: 2,
        queue_size: 128,
        n_edges: u64::MAX,
    };
    let config = Config {
        glob_capacity: 16,
        factor: 24,
        bubble: u32::MAX,
        local_fit: Fit::First,
        global_fit: Fit::First,
        ..Config::default()
    };

    let index = pipeline::run(file.path(), &run, &config).unwrap();
    assert_eq!(index.report.produced, 2000);
    assert_eq!(pipeline::validate(file.path(), &run, &index).unwrap(), 2000);
}

#[test]
fn edge_list_inputs_run_too() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# a comment").unwrap();
    for i in 1..=20u64 {
        writeln!(file, "{} {}", i, i * 3).unwrap();
    }
    file.flush().unwrap();

    let run = Run::default();
    let index = pipeline::run(file.path(), &run, &Config::default()).unwrap();
    assert_eq!(index.report.produced, 20);
    for i in 1..=20u64 {
        assert!(index.contains(key(i, i * 3)));
    }
}
