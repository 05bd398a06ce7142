//! Receive-side accumulation loop.
//!
//! Drains scheduled captures from the radio, undoes the per-pulse phase
//! dither, folds every `num_presums` error-free pulses into one coherent sum
//! and streams completed sums to disk. Per-pulse receive errors are counted
//! and logged but never fatal; the scheduler reacts to the error count by
//! shifting the pulse timeline.

use crate::config::ChirpParams;
use crate::console;
use crate::phase::{PhaseSequence, Side};
use crate::radio::{RxError, RxStream};
use crate::state::RunState;
use crate::writer::SumWriter;
use failure::Error;
use num::complex::Complex;
use num::Zero;
use std::sync::Arc;

pub struct RxAccumulator<R: RxStream> {
    rx: R,
    chirp: ChirpParams,
    num_rx_samps: usize,
    phases: Arc<PhaseSequence>,
    state: Arc<RunState>,
    writer: SumWriter,
    recv_timeout: f64,
}

impl<R: RxStream> RxAccumulator<R> {
    pub fn new(
        rx: R,
        chirp: ChirpParams,
        num_rx_samps: usize,
        phases: Arc<PhaseSequence>,
        state: Arc<RunState>,
        writer: SumWriter,
        recv_timeout: f64,
    ) -> Self {
        RxAccumulator {
            rx,
            chirp,
            num_rx_samps,
            phases,
            state,
            writer,
            recv_timeout,
        }
    }

    pub fn run(mut self) -> Result<(), Error> {
        let mut sample_sum = vec![Complex::zero(); self.num_rx_samps];
        let mut buff = vec![Complex::zero(); self.num_rx_samps];

        console::emit("[START] Beginning main loop");

        loop {
            if self.chirp.num_pulses >= 0 && self.state.last_written() >= self.chirp.num_pulses {
                break;
            }

            let (n_samps, metadata) = self.rx.recv(&mut buff, self.recv_timeout)?;

            // A timeout after the stop flag went up just means the command
            // queue drained; it is not a pulse.
            if metadata.error == Some(RxError::Timeout) && self.state.stop_requested() {
                break;
            }

            // Exactly one draw per recv, errors included, keeps the RX
            // sequence in lockstep with the TX side across failures.
            let mut inversion_phase = 0.0f32;
            if self.chirp.phase_dither {
                inversion_phase = -self.phases.next_phase(Side::Rx);
            }

            let chirp_num = self.state.pulses_received();
            if let Some(code) = metadata.error {
                console::emit(format!(
                    "[ERROR] (Chirp {}) Receiver error: {}",
                    chirp_num, code
                ));
                self.state.note_error();
                self.state.note_received();
            } else if n_samps != self.num_rx_samps {
                console::emit(format!(
                    "[ERROR] (Chirp {}) Unexpected number of samples in the RX buffer. Got: {} Expected: {}",
                    chirp_num, n_samps, self.num_rx_samps
                ));
                self.state.note_error();
                self.state.note_received();
            } else {
                self.state.note_received();

                if self.chirp.phase_dither {
                    // Undo the phase modulation and divide by num_presums in
                    // one multiply.
                    let scale = Complex::from_polar(
                        &(1.0 / self.chirp.num_presums as f32),
                        &inversion_phase,
                    );
                    for samp in buff.iter_mut() {
                        *samp *= scale;
                    }
                } else if self.chirp.num_presums != 1 {
                    let scale = 1.0 / self.chirp.num_presums as f32;
                    for samp in buff.iter_mut() {
                        *samp *= scale;
                    }
                }

                for (acc, samp) in sample_sum.iter_mut().zip(&buff) {
                    *acc += *samp;
                }
            }

            // Each contribution arrived already de-dithered and scaled, so a
            // completed sum goes out as-is.
            let good = self.state.pulses_received() - self.state.error_count();
            if good > self.state.last_written() && good % self.chirp.num_presums == 0 {
                self.writer.write_sum(&sample_sum)?;
                for samp in sample_sum.iter_mut() {
                    *samp = Complex::zero();
                }
                self.state.set_last_written(good);
            }

            self.writer.rotate_if_due(self.state.last_written())?;

            if self.state.stop_requested() {
                console::emit("[RX] Reached stop signal handling for outer RX loop -> break");
                break;
            }
        }

        self.writer.close()?;
        Ok(())
    }
}
