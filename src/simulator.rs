//! Test on a simulation of the radio rather than a real device.
//!
//! The simulated front-end is a loopback: timed transmit bursts land in a
//! shared schedule, `issue_at` queues a capture, and `recv` pairs the oldest
//! capture with whatever bursts overlap its window, so the receive side sees
//! exactly what the transmit side scheduled. A fault plan can make chosen
//! captures come back as errors or short buffers, which is how the error
//! paths of the pipeline get exercised without hardware.

use crate::radio::{RadioClock, RxCommand, RxError, RxMetadata, RxStream, TxStream};
use failure::Error;
use num::{Complex, Zero};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Failure injected for one scheduled capture, keyed by capture index.
#[derive(Debug, Clone, Copy)]
pub enum InjectedFault {
    /// recv reports this error code and produces no samples.
    Error(RxError),
    /// recv completes but returns only this many samples.
    Short(usize),
}

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub tx_rate: f64,
    pub rx_rate: f64,
    /// Radio clock reading at construction.
    pub start_time: f64,
    /// Standard deviation of gaussian noise added to every received sample.
    /// Zero keeps the loopback exact.
    pub noise: f32,
    /// Capture indices that misbehave.
    pub faults: Vec<(u64, InjectedFault)>,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            tx_rate: 1e6,
            rx_rate: 1e6,
            start_time: 0.0,
            noise: 0.0,
            faults: Vec::new(),
            seed: 0,
        }
    }
}

struct Burst {
    time: f64,
    samps: Vec<Complex<f32>>,
}

struct Capture {
    time: f64,
    num_samps: usize,
}

struct SimState {
    /// Virtual radio clock; advances as captures complete.
    now: f64,
    bursts: Vec<Burst>,
    captures: VecDeque<Capture>,
    captures_done: u64,
}

struct Shared {
    config: SimulatorConfig,
    faults: HashMap<u64, InjectedFault>,
    state: Mutex<SimState>,
    issued: Condvar,
    noise: Option<Mutex<(StdRng, Normal<f32>)>>,
}

pub struct SimClock {
    shared: Arc<Shared>,
}

pub struct SimTxStream {
    shared: Arc<Shared>,
}

pub struct SimRxCommand {
    shared: Arc<Shared>,
}

pub struct SimRxStream {
    shared: Arc<Shared>,
}

/// Build the four handles the pipeline needs: clock, transmit stream, the
/// command half and the data half of the receive stream.
pub fn create_simulator(
    config: SimulatorConfig,
) -> (SimClock, SimTxStream, SimRxCommand, SimRxStream) {
    let noise = if config.noise > 0.0 {
        let rng = StdRng::seed_from_u64(config.seed);
        let dist = Normal::new(0.0, config.noise).unwrap();
        Some(Mutex::new((rng, dist)))
    } else {
        None
    };
    let shared = Arc::new(Shared {
        faults: config.faults.iter().cloned().collect(),
        state: Mutex::new(SimState {
            now: config.start_time,
            bursts: Vec::new(),
            captures: VecDeque::new(),
            captures_done: 0,
        }),
        issued: Condvar::new(),
        noise,
        config,
    });
    (
        SimClock {
            shared: shared.clone(),
        },
        SimTxStream {
            shared: shared.clone(),
        },
        SimRxCommand {
            shared: shared.clone(),
        },
        SimRxStream { shared },
    )
}

impl RadioClock for SimClock {
    fn now(&self) -> f64 {
        self.shared.state.lock().unwrap().now
    }
}

impl TxStream for SimTxStream {
    fn send_at(
        &mut self,
        buf: &[Complex<f32>],
        start_time: f64,
        _timeout: f64,
    ) -> Result<usize, Error> {
        let mut state = self.shared.state.lock().unwrap();
        state.bursts.push(Burst {
            time: start_time,
            samps: buf.to_vec(),
        });
        Ok(buf.len())
    }
}

impl RxCommand for SimRxCommand {
    fn issue_at(&mut self, start_time: f64, num_samps: usize) -> Result<(), Error> {
        let mut state = self.shared.state.lock().unwrap();
        state.captures.push_back(Capture {
            time: start_time,
            num_samps,
        });
        self.shared.issued.notify_all();
        Ok(())
    }
}

impl RxStream for SimRxStream {
    fn recv(
        &mut self,
        buf: &mut [Complex<f32>],
        timeout: f64,
    ) -> Result<(usize, RxMetadata), Error> {
        let deadline = Instant::now() + Duration::from_secs_f64(timeout);
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if let Some(capture) = state.captures.pop_front() {
                return Ok(self.complete(&mut state, capture, buf));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok((0, RxMetadata::err(RxError::Timeout)));
            }
            let (guard, _) = self
                .shared
                .issued
                .wait_timeout(state, remaining)
                .unwrap();
            state = guard;
        }
    }
}

impl SimRxStream {
    fn complete(
        &self,
        state: &mut SimState,
        capture: Capture,
        buf: &mut [Complex<f32>],
    ) -> (usize, RxMetadata) {
        let index = state.captures_done;
        state.captures_done += 1;

        let rate = self.shared.config.rx_rate;
        let num_samps = capture.num_samps.min(buf.len());
        let window_start = capture.time;
        let window_end = capture.time + num_samps as f64 / rate;
        state.now = state.now.max(window_end);

        // Bursts that ended before this window can never be matched again.
        // Abandoned slots left behind by the error time shift go away here.
        let tx_rate = self.shared.config.tx_rate;
        state
            .bursts
            .retain(|b| b.time + b.samps.len() as f64 / tx_rate > window_start);

        if let Some(fault) = self.shared.faults.get(&index) {
            match *fault {
                InjectedFault::Error(code) => return (0, RxMetadata::err(code)),
                InjectedFault::Short(n) => {
                    let n = n.min(num_samps);
                    for s in buf[..n].iter_mut() {
                        *s = Complex::zero();
                    }
                    return (n, RxMetadata::ok(window_start));
                }
            }
        }

        for s in buf[..num_samps].iter_mut() {
            *s = Complex::zero();
        }
        for burst in &state.bursts {
            if burst.time >= window_end {
                continue;
            }
            let offset = ((burst.time - window_start) * rate).round() as i64;
            for (i, s) in burst.samps.iter().enumerate() {
                let j = offset + i as i64;
                if j >= 0 && (j as usize) < num_samps {
                    buf[j as usize] += *s;
                }
            }
        }
        state
            .bursts
            .retain(|b| b.time + b.samps.len() as f64 / tx_rate > window_end);

        if let Some(noise) = &self.shared.noise {
            let (rng, dist) = &mut *noise.lock().unwrap();
            for s in buf[..num_samps].iter_mut() {
                *s += Complex::new(dist.sample(rng), dist.sample(rng));
            }
        }

        (num_samps, RxMetadata::ok(window_start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chirp(len: usize) -> Vec<Complex<f32>> {
        (0..len)
            .map(|i| Complex::new(i as f32 + 1.0, -(i as f32)))
            .collect()
    }

    #[test]
    fn loopback_returns_the_burst() {
        let (clock, mut tx, mut rx_cmd, mut rx) = create_simulator(SimulatorConfig::default());
        assert_eq!(clock.now(), 0.0);

        let burst = chirp(8);
        tx.send_at(&burst, 1.0, 1.0).unwrap();
        rx_cmd.issue_at(1.0, 16).unwrap();

        let mut buf = vec![Complex::zero(); 16];
        let (n, md) = rx.recv(&mut buf, 1.0).unwrap();
        assert_eq!(n, 16);
        assert!(md.error.is_none());
        assert_eq!(md.time, 1.0);
        assert_eq!(&buf[..8], &burst[..]);
        assert!(buf[8..].iter().all(|s| s.is_zero()));
        assert!(clock.now() > 1.0);
    }

    #[test]
    fn early_burst_lands_at_a_negative_offset() {
        let (_, mut tx, mut rx_cmd, mut rx) = create_simulator(SimulatorConfig::default());
        // Burst starts 4 samples before the window opens.
        tx.send_at(&chirp(8), 1.0 - 4e-6, 1.0).unwrap();
        rx_cmd.issue_at(1.0, 8).unwrap();

        let mut buf = vec![Complex::zero(); 8];
        let (n, _) = rx.recv(&mut buf, 1.0).unwrap();
        assert_eq!(n, 8);
        assert_eq!(&buf[..4], &chirp(8)[4..]);
        assert!(buf[4..].iter().all(|s| s.is_zero()));
    }

    #[test]
    fn recv_times_out_without_a_capture() {
        let (_, _tx, _rx_cmd, mut rx) = create_simulator(SimulatorConfig::default());
        let mut buf = vec![Complex::zero(); 4];
        let (n, md) = rx.recv(&mut buf, 0.01).unwrap();
        assert_eq!(n, 0);
        assert_eq!(md.error, Some(RxError::Timeout));
    }

    #[test]
    fn faults_fire_on_their_capture_index() {
        let config = SimulatorConfig {
            faults: vec![
                (0, InjectedFault::Error(RxError::Overflow)),
                (1, InjectedFault::Short(3)),
            ],
            ..SimulatorConfig::default()
        };
        let (_, mut tx, mut rx_cmd, mut rx) = create_simulator(config);
        for k in 0..3 {
            tx.send_at(&chirp(4), 1.0 + k as f64 * 1e-3, 1.0).unwrap();
            rx_cmd.issue_at(1.0 + k as f64 * 1e-3, 8).unwrap();
        }

        let mut buf = vec![Complex::zero(); 8];
        let (n, md) = rx.recv(&mut buf, 1.0).unwrap();
        assert_eq!((n, md.error), (0, Some(RxError::Overflow)));
        let (n, md) = rx.recv(&mut buf, 1.0).unwrap();
        assert_eq!((n, md.error), (3, None));
        let (n, md) = rx.recv(&mut buf, 1.0).unwrap();
        assert_eq!((n, md.error), (8, None));
        assert_eq!(&buf[..4], &chirp(4)[..]);
    }
}
