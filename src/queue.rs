//! Multi-producer/single-consumer bulk queues.
//!
//! Each consumer owns one [`MpscQueue`]: a bounded ring per producer, so
//! every producer keeps FIFO order on its own traffic without contending
//! with the others. Producer endpoints are minted under a lock — claiming a
//! ring is the token-creation step and is not otherwise thread-safe — and
//! spin when their ring is full, counting stalls. The consumer endpoint
//! drains into a local buffer in bulk before re-polling the rings.
//!
//! The bubble channel uses the unbounded [`OpenQueue`] flavor: same
//! endpoint surface, but pushes cannot fail and do not stall.

use crossbeam_queue::{ArrayQueue, SegQueue};
use crossbeam_utils::CachePadded;
use std::hint;
use std::sync::Mutex;

pub struct MpscQueue<T> {
    rings: Vec<CachePadded<ArrayQueue<T>>>,
    minted: Mutex<usize>,
}

impl<T> MpscQueue<T> {
    pub fn new(n_producers: usize, ring_size: usize) -> Self {
        assert!(n_producers >= 1);
        assert!(ring_size >= 1);
        Self {
            rings: (0..n_producers)
                .map(|_| CachePadded::new(ArrayQueue::new(ring_size)))
                .collect(),
            minted: Mutex::new(0),
        }
    }

    /// Keys currently queued, approximately.
    pub fn len(&self) -> usize {
        self.rings.iter().map(|ring| ring.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rings.iter().all(|ring| ring.is_empty())
    }

    /// Claim a producer ring. Panics when more endpoints are minted than the
    /// queue was built for.
    pub fn tx_endpoint(&self) -> TxEndpoint<'_, T> {
        let mut minted = self.minted.lock().unwrap();
        let ring: &ArrayQueue<T> = self
            .rings
            .get(*minted)
            .expect("queue oversubscribed: every producer ring is claimed");
        *minted += 1;
        TxEndpoint {
            ring,
            stalls: 0,
            total: 0,
        }
    }

    /// The consumer endpoint. `buffer` is the bulk-dequeue batch size.
    pub fn rx_endpoint(&self, buffer: usize) -> RxEndpoint<'_, T> {
        RxEndpoint {
            rings: &self.rings,
            buffer: Vec::with_capacity(buffer.max(1)),
            batch: buffer.max(1),
            stalls: 0,
            total: 0,
        }
    }
}

pub struct TxEndpoint<'q, T> {
    ring: &'q ArrayQueue<T>,
    pub stalls: u64,
    pub total: u64,
}

impl<T> TxEndpoint<'_, T> {
    /// Enqueue, spinning while the ring is full.
    pub fn enqueue(&mut self, value: T) {
        let mut value = value;
        while let Err(rejected) = self.ring.push(value) {
            value = rejected;
            self.stalls += 1;
            hint::spin_loop();
        }
        self.total += 1;
    }

    pub fn enqueue_bulk(&mut self, values: impl IntoIterator<Item = T>) {
        for value in values {
            self.enqueue(value);
        }
    }

    pub fn try_enqueue(&mut self, value: T) -> bool {
        match self.ring.push(value) {
            Ok(()) => {
                self.total += 1;
                true
            }
            Err(_) => {
                self.stalls += 1;
                false
            }
        }
    }
}

pub struct RxEndpoint<'q, T> {
    rings: &'q [CachePadded<ArrayQueue<T>>],
    buffer: Vec<T>,
    batch: usize,
    pub stalls: u64,
    pub total: u64,
}

impl<T> RxEndpoint<'_, T> {
    /// Pop one key, refilling the local buffer in bulk when it runs dry.
    /// `None` counts a stall: nothing buffered and nothing queued.
    pub fn try_dequeue(&mut self) -> Option<T> {
        if let Some(value) = self.buffer.pop() {
            self.total += 1;
            return Some(value);
        }

        for ring in self.rings {
            while self.buffer.len() < self.batch {
                match ring.pop() {
                    Some(value) => self.buffer.push(value),
                    None => break,
                }
            }
            if self.buffer.len() == self.batch {
                break;
            }
        }
        // The buffer drains from the back; flip the batch so each
        // producer's keys come out in the order they went in.
        self.buffer.reverse();

        match self.buffer.pop() {
            Some(value) => {
                self.total += 1;
                Some(value)
            }
            None => {
                self.stalls += 1;
                None
            }
        }
    }

    /// Keys still visible to this endpoint, locally buffered or queued.
    pub fn len(&self) -> usize {
        self.buffer.len() + self.rings.iter().map(|ring| ring.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unbounded MPSC queue with the same endpoint surface.
pub struct OpenQueue<T> {
    shared: SegQueue<T>,
}

impl<T> OpenQueue<T> {
    pub fn new() -> Self {
        Self {
            shared: SegQueue::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.is_empty()
    }

    pub fn tx_endpoint(&self) -> OpenTxEndpoint<'_, T> {
        OpenTxEndpoint {
            shared: &self.shared,
            total: 0,
        }
    }

    pub fn rx_endpoint(&self, buffer: usize) -> OpenRxEndpoint<'_, T> {
        OpenRxEndpoint {
            shared: &self.shared,
            buffer: Vec::with_capacity(buffer.max(1)),
            batch: buffer.max(1),
            stalls: 0,
            total: 0,
        }
    }
}

impl<T> Default for OpenQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct OpenTxEndpoint<'q, T> {
    shared: &'q SegQueue<T>,
    pub total: u64,
}

impl<T> OpenTxEndpoint<'_, T> {
    pub fn enqueue(&mut self, value: T) {
        self.shared.push(value);
        self.total += 1;
    }

    pub fn enqueue_bulk(&mut self, values: impl IntoIterator<Item = T>) {
        for value in values {
            self.enqueue(value);
        }
    }
}

pub struct OpenRxEndpoint<'q, T> {
    shared: &'q SegQueue<T>,
    buffer: Vec<T>,
    batch: usize,
    pub stalls: u64,
    pub total: u64,
}

impl<T> OpenRxEndpoint<'_, T> {
    pub fn try_dequeue(&mut self) -> Option<T> {
        if let Some(value) = self.buffer.pop() {
            self.total += 1;
            return Some(value);
        }

        while self.buffer.len() < self.batch {
            match self.shared.pop() {
                Some(value) => self.buffer.push(value),
                None => break,
            }
        }
        self.buffer.reverse();

        match self.buffer.pop() {
            Some(value) => {
                self.total += 1;
                Some(value)
            }
            None => {
                self.stalls += 1;
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len() + self.shared.len()
    }
}
