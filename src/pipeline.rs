//! The ingest pipeline.
//!
//! Producers stream records out of their block of the input file and route
//! each key, via the shared table, to the queue of the consumer whose
//! service currently owns it. Consumers drain their queue into their
//! services; a key whose owner moved, or the keys of a glob that ejected
//! towards another service, go to the bubble queue, where a dedicated
//! router re-routes them. After the producers finish, the consumers and the
//! router keep draining under the quiescence barrier until two consecutive
//! rounds see no work anywhere.

use crate::barrier::QuiescenceBarrier;
use crate::config::Config;
use crate::ingest::{self, RecordStream};
use crate::queue::{MpscQueue, OpenQueue};
use crate::route::TopLevelTree;
use crate::service::Service;
use crate::trie::GlobTrieNode;
use anyhow::{ensure, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering::{Acquire, Release}};
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Thread and sizing parameters for one run.
#[derive(Debug, Clone)]
pub struct Run {
    pub n_producers: u32,
    pub n_consumers: u32,
    pub n_services: u32,
    pub queue_size: u32,
    /// Upper bound on edges to process, split evenly across producers.
    pub n_edges: u64,
}

impl Default for Run {
    fn default() -> Self {
        Self {
            n_producers: 1,
            n_consumers: 1,
            n_services: 1,
            queue_size: 512,
            n_edges: u64::MAX,
        }
    }
}

impl Run {
    fn n_edges_per_producer(&self) -> u64 {
        self.n_edges / self.n_producers as u64
    }
}

/// Counters aggregated over the whole run.
#[derive(Debug, Default, Clone)]
pub struct Report {
    /// Keys enqueued by producers.
    pub produced: u64,
    /// Successful service inserts, counted at the consumers.
    pub inserted: u64,
    /// Keys the bubble router re-routed.
    pub transferred: u64,
    pub producer_stalls: u64,
    pub consumer_stalls: u64,
    pub elapsed: Duration,
}

/// The finished index: the routing table and one glob trie per service.
pub struct Index {
    pub table: TopLevelTree,
    pub tries: Vec<GlobTrieNode>,
    pub report: Report,
}

impl Index {
    /// Membership against the service that currently owns `key`.
    pub fn contains(&self, key: u128) -> bool {
        let service = self.table.lookup(key);
        self.tries[service as usize].find(key)
    }
}

/// Which consumer runs a service: services are sliced contiguously.
pub fn service_to_consumer(service: u32, n_services: u32, n_consumers: u32) -> u32 {
    let d = n_services / n_consumers + u32::from(n_services % n_consumers != 0);
    service / d
}

/// Run the pipeline to quiescence over `path`.
pub fn run(path: &Path, run: &Run, config: &Config) -> Result<Index> {
    ensure!(run.n_producers >= 1, "need at least one producer");
    ensure!(run.n_consumers >= 1, "need at least one consumer");
    ensure!(run.n_services >= 1, "need at least one service");

    let n_consumers = run.n_consumers;
    let n_services = run.n_services;
    let n_edges_per_producer = run.n_edges_per_producer();
    let per_consumer = n_services / n_consumers + u32::from(n_services % n_consumers != 0);

    // Open every rank's reader up front so I/O failures surface before any
    // thread exists.
    let format = ingest::detect(path)?;
    let mut readers = Vec::with_capacity(run.n_producers as usize);
    for rank in 0..run.n_producers {
        readers.push(ingest::open(path, format, run.n_producers, rank)?);
    }

    let table = TopLevelTree::new(n_services);
    // Every consumer queue serves its producers plus the bubble router.
    let queues: Vec<MpscQueue<u128>> = (0..n_consumers)
        .map(|_| MpscQueue::new(run.n_producers as usize + 1, run.queue_size as usize))
        .collect();
    let bubbles: OpenQueue<u128> = OpenQueue::new();

    let done = AtomicBool::new(false);
    let quiesce = QuiescenceBarrier::new(n_consumers + 1);
    let consumer_barrier = Barrier::new(n_consumers as usize + 1);
    let producer_barrier = Barrier::new(run.n_producers as usize + 1);

    let started = Instant::now();

    let (tries, mut report) = thread::scope(|scope| -> Result<(Vec<GlobTrieNode>, Report)> {
        let table = &table;
        let queues = &queues;
        let bubbles = &bubbles;
        let done = &done;
        let quiesce = &quiesce;
        let consumer_barrier = &consumer_barrier;
        let producer_barrier = &producer_barrier;

        let mut consumers = Vec::with_capacity(n_consumers as usize);
        for id in 0..n_consumers {
            consumers.push(scope.spawn(move || {
                info!("starting consumer {id}");

                let lo = (id * per_consumer).min(n_services);
                let hi = (lo + per_consumer).min(n_services);
                let mut services: Vec<Service> =
                    (lo..hi).map(|sid| Service::new(sid, table)).collect();

                let mut rx = queues[id as usize].rx_endpoint(config.glob_capacity);
                let mut bubble_tx = bubbles.tx_endpoint();

                consumer_barrier.wait();

                let mut inserted = 0u64;
                let mut drain = || {
                    let mut active = 0usize;
                    while let Some(key) = rx.try_dequeue() {
                        let service = table.lookup(key);

                        // this key's owner might have moved
                        if id != service_to_consumer(service, n_services, n_consumers) {
                            debug!("discovered re-homed key {key:#034x} on consumer {id}");
                            bubble_tx.enqueue(key);
                            continue;
                        }

                        match services[(service - lo) as usize].insert(key, config) {
                            Ok(_) => {
                                inserted += 1;
                                active += 1;
                            }
                            Err(keys) => bubble_tx.enqueue_bulk(keys),
                        }
                    }
                    active
                };

                while !done.load(Acquire) {
                    drain();
                }

                quiesce.run(&mut drain);

                assert_eq!(rx.len(), 0, "consumer {id} stopped with keys queued");

                consumer_barrier.wait();

                info!(
                    "consumer {id} processed {inserted} keys ({} stalls)",
                    rx.stalls
                );
                (services, inserted, rx.stalls)
            }));
        }

        let mut producers = Vec::with_capacity(readers.len());
        for (rank, mut reader) in readers.into_iter().enumerate() {
            producers.push(scope.spawn(move || -> Result<(u64, u64)> {
                info!("starting producer {rank}");

                let mut tx: Vec<_> = queues.iter().map(|queue| queue.tx_endpoint()).collect();

                producer_barrier.wait();

                let mut produced = 0u64;
                let mut failure = None;
                while produced < n_edges_per_producer {
                    match reader.next() {
                        Ok(Some(record)) => {
                            let key = record.to_key();
                            let service = table.lookup(key);
                            let consumer =
                                service_to_consumer(service, n_services, n_consumers);
                            tx[consumer as usize].enqueue(key);
                            produced += 1;
                        }
                        Ok(None) => break,
                        Err(error) => {
                            failure = Some(error);
                            break;
                        }
                    }
                }

                producer_barrier.wait();

                let stalls: u64 = tx.iter().map(|endpoint| endpoint.stalls).sum();
                info!("producer {rank} processed {produced} keys ({stalls} stalls)");

                match failure {
                    Some(error) => Err(error),
                    None => Ok((produced, stalls)),
                }
            }));
        }

        let router = scope.spawn(move || {
            let mut rx = bubbles.rx_endpoint(config.glob_capacity);
            let mut tx: Vec<_> = queues.iter().map(|queue| queue.tx_endpoint()).collect();

            let mut transferred = 0u64;
            let mut drain = || {
                let mut active = 0usize;
                while let Some(key) = rx.try_dequeue() {
                    let service = table.lookup(key);
                    let consumer = service_to_consumer(service, n_services, n_consumers);
                    tx[consumer as usize].enqueue(key);
                    transferred += 1;
                    active += 1;
                }
                active
            };

            while !done.load(Acquire) {
                drain();
            }

            quiesce.run(&mut drain);

            info!("bubble router transferred {transferred} keys");
            transferred
        });

        // Release the consumers, then the producers; when the producers
        // rendezvous again the stream is exhausted and the drain phase
        // begins.
        consumer_barrier.wait();
        producer_barrier.wait();

        producer_barrier.wait();
        done.store(true, Release);
        consumer_barrier.wait();

        let mut report = Report::default();
        let mut tries = Vec::with_capacity(n_services as usize);
        for handle in consumers {
            let (services, inserted, stalls) = join(handle);
            report.inserted += inserted;
            report.consumer_stalls += stalls;
            tries.extend(services.into_iter().map(Service::into_globs));
        }
        let mut failure = None;
        for handle in producers {
            match join(handle) {
                Ok((produced, stalls)) => {
                    report.produced += produced;
                    report.producer_stalls += stalls;
                }
                Err(error) => failure = Some(error),
            }
        }
        report.transferred = join(router);
        if let Some(error) = failure {
            return Err(error);
        }
        Ok((tries, report))
    })?;

    report.elapsed = started.elapsed();
    info!("pipeline drained in {:?}", report.elapsed);

    Ok(Index {
        table,
        tries,
        report,
    })
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, T>) -> T {
    match handle.join() {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Re-scan the input with the same partitioning and confirm every key is
/// indexed by its owning service. Returns the number of keys checked.
pub fn validate(path: &Path, run: &Run, index: &Index) -> Result<u64> {
    let format = ingest::detect(path)?;
    let n_edges_per_producer = run.n_edges_per_producer();

    let mut validated = 0u64;
    for rank in 0..run.n_producers {
        let mut reader = ingest::open(path, format, run.n_producers, rank)?;
        let mut n = 0u64;
        while n < n_edges_per_producer {
            let Some(record) = reader.next()? else {
                break;
            };
            let key = record.to_key();
            let service = index.table.lookup(key);
            ensure!(
                index.tries[service as usize].find(key),
                "failed to find {key:#034x} in service {service}"
            );
            n += 1;
            validated += 1;
        }
    }
    Ok(validated)
}
