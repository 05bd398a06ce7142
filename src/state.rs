//! Counters shared between the two worker threads.
//!
//! Every counter has exactly one writer: the scheduler owns
//! `pulses_scheduled` and `time_offset`, the accumulator owns
//! `pulses_received`, `error_count` and `last_pulse_num_written`, and the
//! interrupt handler owns `stop_requested`. Atomic loads and stores are
//! enough; the condvar only exists so the scheduler's look-ahead throttle
//! can sleep until the receive side makes progress instead of spinning.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub struct RunState {
    pulses_scheduled: AtomicI64,
    pulses_received: AtomicI64,
    error_count: AtomicI64,
    last_pulse_num_written: AtomicI64,
    stop_requested: AtomicBool,
    /// Absolute radio time of pulse slot 0, stored as f64 bits. Grows when
    /// the receive side reports errors so future slots land clear of the
    /// radio's continued forward streaming.
    time_offset: AtomicU64,
    progress: Mutex<()>,
    received_cv: Condvar,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        RunState {
            pulses_scheduled: AtomicI64::new(0),
            pulses_received: AtomicI64::new(0),
            error_count: AtomicI64::new(0),
            last_pulse_num_written: AtomicI64::new(0),
            stop_requested: AtomicBool::new(false),
            time_offset: AtomicU64::new(0f64.to_bits()),
            progress: Mutex::new(()),
            received_cv: Condvar::new(),
        }
    }

    pub fn pulses_scheduled(&self) -> i64 {
        self.pulses_scheduled.load(Ordering::Relaxed)
    }

    /// Scheduler only.
    pub fn add_scheduled(&self) -> i64 {
        self.pulses_scheduled.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn pulses_received(&self) -> i64 {
        self.pulses_received.load(Ordering::Relaxed)
    }

    /// Accumulator only. Wakes the scheduler if it is throttled.
    pub fn note_received(&self) -> i64 {
        let n = self.pulses_received.fetch_add(1, Ordering::Relaxed) + 1;
        let _guard = self.progress.lock().unwrap();
        self.received_cv.notify_all();
        n
    }

    pub fn error_count(&self) -> i64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Accumulator only.
    pub fn note_error(&self) -> i64 {
        self.error_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn last_written(&self) -> i64 {
        self.last_pulse_num_written.load(Ordering::Relaxed)
    }

    /// Accumulator only.
    pub fn set_last_written(&self, n: i64) {
        self.last_pulse_num_written.store(n, Ordering::Relaxed);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Relaxed)
    }

    /// Flipped once by the interrupt handler (or a fatal error on either
    /// thread); both workers poll it and finish their current iteration.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Relaxed);
        let _guard = self.progress.lock().unwrap();
        self.received_cv.notify_all();
    }

    pub fn time_offset(&self) -> f64 {
        f64::from_bits(self.time_offset.load(Ordering::Relaxed))
    }

    /// Scheduler only (the supervisor stores the promoted value once before
    /// the threads start).
    pub fn set_time_offset(&self, secs: f64) {
        self.time_offset.store(secs.to_bits(), Ordering::Relaxed);
    }

    /// Park until `note_received` or `request_stop` fires, or `timeout`
    /// passes. Spurious wakeups are fine, the caller re-checks its condition.
    pub fn wait_received_change(&self, timeout: Duration) {
        let guard = self.progress.lock().unwrap();
        let _ = self.received_cv.wait_timeout(guard, timeout).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn counters_start_at_zero() {
        let state = RunState::new();
        assert_eq!(state.pulses_scheduled(), 0);
        assert_eq!(state.pulses_received(), 0);
        assert_eq!(state.error_count(), 0);
        assert_eq!(state.last_written(), 0);
        assert!(!state.stop_requested());
    }

    #[test]
    fn increments_are_visible() {
        let state = RunState::new();
        assert_eq!(state.add_scheduled(), 1);
        assert_eq!(state.note_received(), 1);
        assert_eq!(state.note_error(), 1);
        state.set_last_written(4);
        assert_eq!(state.last_written(), 4);
    }

    #[test]
    fn time_offset_round_trips() {
        let state = RunState::new();
        state.set_time_offset(1.25e-3);
        assert_eq!(state.time_offset(), 1.25e-3);
    }

    #[test]
    fn stop_wakes_a_waiter() {
        let state = Arc::new(RunState::new());
        let waiter = {
            let state = state.clone();
            thread::spawn(move || {
                while !state.stop_requested() {
                    state.wait_received_change(Duration::from_millis(50));
                }
            })
        };
        state.request_stop();
        waiter.join().unwrap();
    }
}
