//! Transmit-side pulse scheduler.
//!
//! Runs on its own thread and stays a bounded number of pulses ahead of the
//! receive side, handing the radio a timed TX burst and a timed RX capture
//! command for every pulse slot. When the receive side reports errors the
//! whole timeline is shifted forward so fresh slots land clear of whatever
//! state the radio was left in.

use crate::config::ChirpParams;
use crate::console;
use crate::phase::{PhaseSequence, Side};
use crate::radio::{RxCommand, TxStream};
use crate::state::RunState;
use failure::Error;
use num::complex::Complex;
use std::sync::Arc;
use std::time::Duration;

/// How many pulses the scheduler may run ahead of the receiver. The radio
/// transport documents a command queue depth of 8 and each pulse costs two
/// commands (one TX, one RX), so 6 pulses in flight leaves margin.
pub const LOOKAHEAD_PULSES: i64 = 6;

pub struct TxScheduler<T: TxStream, C: RxCommand> {
    tx: T,
    rx_cmd: C,
    chirp: ChirpParams,
    /// Private copy of the unmodulated waveform.
    waveform: Vec<Complex<f32>>,
    num_rx_samps: usize,
    transmit: bool,
    phases: Arc<PhaseSequence>,
    state: Arc<RunState>,
    send_timeout: f64,
}

impl<T: TxStream, C: RxCommand> TxScheduler<T, C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tx: T,
        rx_cmd: C,
        chirp: ChirpParams,
        waveform: Vec<Complex<f32>>,
        num_rx_samps: usize,
        transmit: bool,
        phases: Arc<PhaseSequence>,
        state: Arc<RunState>,
        send_timeout: f64,
    ) -> Self {
        TxScheduler {
            tx,
            rx_cmd,
            chirp,
            waveform,
            num_rx_samps,
            transmit,
            phases,
            state,
            send_timeout,
        }
    }

    pub fn run(mut self) -> Result<(), Error> {
        let num_tx_samps = self.waveform.len();
        let mut tx_buf = self.waveform.clone();
        let mut last_error_count = 0i64;

        'pulses: loop {
            if self.chirp.num_pulses >= 0
                && self.state.pulses_scheduled() - self.state.error_count()
                    >= self.chirp.num_pulses
            {
                break;
            }

            if self.chirp.phase_dither {
                let phase = self.phases.next_phase(Side::Tx);
                let rotation = Complex::from_polar(&1.0f32, &phase);
                for (out, samp) in tx_buf.iter_mut().zip(&self.waveform) {
                    *out = samp * rotation;
                }
            }

            // Let the transport buffering do its job, but never leave more
            // commands in flight than its queue can hold.
            while self.state.pulses_scheduled() - LOOKAHEAD_PULSES > self.state.pulses_received()
            {
                if self.state.stop_requested() {
                    console::emit("[TX] stop signal called while scheduler thread waiting -> break");
                    break 'pulses;
                }
                self.state.wait_received_change(Duration::from_millis(1));
            }

            // Failed slots are left behind: shifting the timeline gives the
            // radio room to settle past them before the next pulse.
            let error_count = self.state.error_count();
            if error_count > last_error_count {
                let delay =
                    (error_count - last_error_count) as f64 * 2.0 * self.chirp.pulse_rep_int;
                self.state.set_time_offset(self.state.time_offset() + delay);
                console::emit(format!(
                    "[TX] (Chirp {}) time_offset increased by {}",
                    self.state.pulses_scheduled(),
                    delay
                ));
                last_error_count = error_count;
            }

            let scheduled = self.state.pulses_scheduled();
            let rx_time = self.state.time_offset() + self.chirp.pulse_rep_int * scheduled as f64;

            if self.transmit {
                let sent =
                    self.tx
                        .send_at(&tx_buf, rx_time - self.chirp.tx_lead, self.send_timeout)?;
                if sent != num_tx_samps {
                    // The receive side will see the damage and shift time.
                    log::warn!(
                        "short TX send on pulse {}: sent {} of {} samples",
                        scheduled,
                        sent,
                        num_tx_samps
                    );
                }
            }
            self.rx_cmd.issue_at(rx_time, self.num_rx_samps)?;

            self.state.add_scheduled();

            if self.state.stop_requested() {
                console::emit("[TX] stop signal called -> break");
                break;
            }
        }

        console::emit("[TX] Done.");
        Ok(())
    }
}
