//! Pseudorandom phase dither sequence.
//!
//! One deterministic stream of phases uniform in [0, 2pi) is consumed by two
//! sides: the scheduler draws the k-th phase to rotate the k-th transmit
//! pulse, the accumulator draws the same k-th phase to undo it on receive.
//! Both sides advance an independent cursor over the single underlying
//! sequence, so the k-th TX draw and the k-th RX draw always return the same
//! value no matter how the calls interleave. The look-ahead throttle keeps
//! `tx_cursor >= rx_cursor`, which bounds how much of the sequence has to be
//! buffered.

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Mutex;

/// Which side of the pipeline is drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Tx,
    Rx,
}

pub struct PhaseSequence {
    inner: Mutex<Inner>,
}

struct Inner {
    rng: StdRng,
    dist: Uniform<f32>,
    /// Phases generated but not yet consumed by both cursors. `base` is the
    /// absolute index of `pending[0]`.
    pending: VecDeque<f32>,
    base: u64,
    tx_cursor: u64,
    rx_cursor: u64,
}

impl PhaseSequence {
    /// A deterministic seed keeps runs reproducible; nothing in the pipeline
    /// needs wall-clock entropy.
    pub fn from_seed(seed: u64) -> Self {
        PhaseSequence {
            inner: Mutex::new(Inner {
                rng: StdRng::seed_from_u64(seed),
                dist: Uniform::new(0.0f32, 2.0 * PI),
                pending: VecDeque::new(),
                base: 0,
                tx_cursor: 0,
                rx_cursor: 0,
            }),
        }
    }

    /// Next phase for the given side.
    pub fn next_phase(&self, side: Side) -> f32 {
        let mut inner = self.inner.lock().unwrap();
        inner.draw(side)
    }

    /// `n` consecutive phases for the given side. `n = 0` yields an empty
    /// vector.
    pub fn next_n_phases(&self, n: usize, side: Side) -> Vec<f32> {
        let mut inner = self.inner.lock().unwrap();
        (0..n).map(|_| inner.draw(side)).collect()
    }
}

impl Inner {
    fn draw(&mut self, side: Side) -> f32 {
        let index = match side {
            Side::Tx => self.tx_cursor,
            Side::Rx => self.rx_cursor,
        };

        while index >= self.base + self.pending.len() as u64 {
            let phase = self.dist.sample(&mut self.rng);
            self.pending.push_back(phase);
        }
        let phase = self.pending[(index - self.base) as usize];

        match side {
            Side::Tx => self.tx_cursor += 1,
            Side::Rx => self.rx_cursor += 1,
        }

        // Drop everything both sides are done with.
        let consumed = self.tx_cursor.min(self.rx_cursor);
        while self.base < consumed {
            self.pending.pop_front();
            self.base += 1;
        }

        phase
    }
}
