//! The quiescence barrier.
//!
//! Work in the pipeline can slosh around after the producers finish: a
//! consumer forwards keys to the bubble queue, the router re-routes them,
//! and the receiving consumer may eject again. Nobody can stop just because
//! *it* ran dry. The barrier lets every drainer report whether it did any
//! work this round; only after two consecutive rounds in which nobody did
//! anything is the pipeline truly drained — one quiescent round can still
//! have keys in flight that were enqueued after their target already
//! reported.

use std::sync::{Condvar, Mutex};

pub struct QuiescenceBarrier {
    participants: u32,
    state: Mutex<State>,
    cond: Condvar,
}

struct State {
    arrived: u32,
    generation: u64,
    active: bool,
    quiescent_rounds: u32,
}

impl QuiescenceBarrier {
    pub fn new(participants: u32) -> Self {
        assert!(participants >= 1);
        Self {
            participants,
            state: Mutex::new(State {
                arrived: 0,
                generation: 0,
                active: false,
                quiescent_rounds: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Report whether this participant did any work since its last arrival
    /// and wait out the round. Returns `true` while another round is needed.
    pub fn join(&self, active: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        state.active |= active;
        state.arrived += 1;

        if state.arrived == self.participants {
            // Last arrival closes the round.
            state.arrived = 0;
            state.quiescent_rounds = if std::mem::take(&mut state.active) {
                0
            } else {
                state.quiescent_rounds + 1
            };
            state.generation += 1;
            self.cond.notify_all();
        } else {
            let generation = state.generation;
            while state.generation == generation {
                state = self.cond.wait(state).unwrap();
            }
        }

        state.quiescent_rounds < 2
    }

    /// Drive `work` under the barrier until the whole group quiesces. The
    /// closure returns how many items it handled this round.
    pub fn run(&self, mut work: impl FnMut() -> usize) {
        while self.join(work() != 0) {}
    }
}
