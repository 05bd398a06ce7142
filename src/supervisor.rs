//! Run lifecycle: wiring the workers to a radio and seeing them out.
//!
//! The supervisor owns everything that happens exactly once per run:
//! computing sample counts, promoting the configured time offset to absolute
//! radio time, loading the waveform, opening the output file, spawning the
//! scheduler thread, running the accumulator on the calling thread and
//! joining with a summary. The binary and the end-to-end tests both enter
//! through [`run`].

use crate::accumulator::RxAccumulator;
use crate::config::Config;
use crate::console;
use crate::phase::PhaseSequence;
use crate::radio::{RadioClock, RxCommand, RxStream, TxStream};
use crate::scheduler::TxScheduler;
use crate::state::RunState;
use crate::waveform;
use crate::writer::SumWriter;
use failure::{format_err, Error};
use std::sync::Arc;
use std::thread;

/// Final accounting reported after a run.
#[derive(Debug, Clone, Copy)]
pub struct RunTotals {
    pub error_count: i64,
    pub last_pulse_num_written: i64,
    pub pulses_received: i64,
}

/// Knobs that do not come from the config file.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub phase_seed: u64,
    /// recv timeout in seconds. Generous in production because the cadence
    /// is set by the pulse repetition interval; it only bounds the exit
    /// latency when the hardware wedges. Tests shrink it.
    pub recv_timeout: f64,
    pub send_timeout: f64,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            phase_seed: 0,
            recv_timeout: 60.0,
            send_timeout: 60.0,
        }
    }
}

pub fn run<K, T, C, R>(
    config: &Config,
    clock: &K,
    tx: T,
    rx_cmd: C,
    rx: R,
    state: Arc<RunState>,
    options: RunOptions,
) -> Result<RunTotals, Error>
where
    K: RadioClock,
    T: TxStream + 'static,
    C: RxCommand + 'static,
    R: RxStream,
{
    // This print is parsed by automated post-processing code; the format
    // must stay `[VERSION] major.minor.patch` and it must come first.
    console::emit(format!("[VERSION] {}", crate::VERSION));
    console::emit("Note: Phase inversion is performed in this code.");
    console::emit(
        "Note: Pre-summing is supported. If used, each sample written will have num_presums error-free samples averaged in.",
    );
    console::emit("Note: Nothing is written to the file for error pulses.");
    console::emit(
        "Note: A full num_pulses of error-free chirp data will be collected. (Total number of TX chirps will be num_pulses + # errors)",
    );

    let num_tx_samps = config.num_tx_samps();
    let num_rx_samps = config.num_rx_samps();
    console::emit(format!("INFO: Number of TX samples: {}", num_tx_samps));
    console::emit(format!("INFO: Number of RX samples: {}", num_rx_samps));

    if config.chirp.num_pulses < 0 {
        console::emit("num_pulses is < 0. Will continue to send chirps until stopped with Ctrl-C.");
    }
    if !config.transmit_enabled() {
        log::warn!("transmit disabled by configuration file");
    }

    // The configured offset is relative; anchor slot 0 to the radio's clock.
    state.set_time_offset(config.chirp.time_offset + clock.now());

    let chirp_samps = waveform::load(&config.chirp_path(), num_tx_samps)?;
    let writer = SumWriter::create(&config.save_path(), config.files.max_chirps_per_file)?;
    let phases = Arc::new(PhaseSequence::from_seed(options.phase_seed));

    let scheduler = TxScheduler::new(
        tx,
        rx_cmd,
        config.chirp.clone(),
        chirp_samps,
        num_rx_samps,
        config.transmit_enabled(),
        phases.clone(),
        state.clone(),
        options.send_timeout,
    );

    let scheduler_state = state.clone();
    let tx_thread = thread::Builder::new()
        .name("tx-scheduler".to_string())
        .spawn(move || {
            elevate_priority();
            let result = scheduler.run();
            if result.is_err() {
                // Without this the accumulator would wait out its full recv
                // timeout on captures that are never coming.
                scheduler_state.request_stop();
            }
            result
        })?;

    elevate_priority();
    let accumulator = RxAccumulator::new(
        rx,
        config.chirp.clone(),
        num_rx_samps,
        phases,
        state.clone(),
        writer,
        options.recv_timeout,
    );
    let rx_result = accumulator.run();
    if rx_result.is_err() {
        state.request_stop();
    }

    console::emit("[RX] Done. Joining transmit thread.");
    let tx_result = tx_thread
        .join()
        .map_err(|_| format_err!("transmit thread panicked"))?;
    rx_result?;
    tx_result?;

    let totals = RunTotals {
        error_count: state.error_count(),
        last_pulse_num_written: state.last_written(),
        pulses_received: state.pulses_received(),
    };
    console::emit(format!("[RX] Error count: {}", totals.error_count));
    console::emit(format!(
        "[RX] Total pulses written: {}",
        totals.last_pulse_num_written
    ));
    console::emit(format!(
        "[RX] Total pulses attempted: {}",
        totals.pulses_received
    ));
    Ok(totals)
}

/// Both workers want real-time-ish scheduling; losing that fight (for
/// example when not running as root) is only worth a warning.
fn elevate_priority() {
    if let Err(err) = thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max)
    {
        log::warn!("could not raise thread priority: {:?}", err);
    }
}
