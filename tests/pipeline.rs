//! End-to-end runs of the full pulse pipeline against the loopback
//! simulator: scheduler thread, accumulator, writer and phase sequence all
//! wired together by the supervisor exactly as the binary does it.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use failure::Error;
use num::complex::Complex;
use num::Zero;
use pulse_radar::config::Config;
use pulse_radar::radio::{RxError, RxMetadata, RxStream};
use pulse_radar::simulator::{create_simulator, InjectedFault, SimulatorConfig};
use pulse_radar::state::RunState;
use pulse_radar::supervisor::{self, RunOptions, RunTotals};
use std::fs::{self, File};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

const RATE: f64 = 1e6;
const TX_SAMPS: usize = 16;
const RX_SAMPS: usize = 32;
const PRI: f64 = 200e-6;
const SIM_START_TIME: f64 = 2.0;
const CFG_TIME_OFFSET: f64 = 0.5;

struct Scenario {
    num_pulses: i64,
    num_presums: i64,
    phase_dither: bool,
    max_chirps_per_file: i64,
    faults: Vec<(u64, InjectedFault)>,
    /// Request a stop once this many pulses have been received.
    stop_after: Option<i64>,
}

impl Default for Scenario {
    fn default() -> Self {
        Scenario {
            num_pulses: 10,
            num_presums: 1,
            phase_dither: false,
            max_chirps_per_file: -1,
            faults: Vec::new(),
            stop_after: None,
        }
    }
}

fn chirp_samps() -> Vec<Complex<f32>> {
    // Unit-magnitude samples with a quadratic phase ramp, chirp-like enough
    // for the arithmetic to be meaningful.
    (0..TX_SAMPS)
        .map(|i| {
            let phase = 0.05 * (i * i) as f32;
            Complex::new(phase.cos(), phase.sin())
        })
        .collect()
}

/// What one clean receive window looks like: the burst at the front, zeros
/// behind it (tx_lead is zero in these scenarios).
fn expected_window() -> Vec<Complex<f32>> {
    let mut window = vec![Complex::zero(); RX_SAMPS];
    window[..TX_SAMPS].copy_from_slice(&chirp_samps());
    window
}

fn write_chirp_file(path: &Path) {
    let mut file = File::create(path).unwrap();
    for s in chirp_samps() {
        file.write_f32::<LittleEndian>(s.re).unwrap();
        file.write_f32::<LittleEndian>(s.im).unwrap();
    }
}

fn build_config(dir: &Path, scenario: &Scenario) -> Config {
    let yaml = format!(
        r#"
CHIRP:
  time_offset: {time_offset}
  tx_duration: 16.0e-6
  rx_duration: 32.0e-6
  tr_on_lead: 0.0
  tr_off_trail: 0.0
  pulse_rep_int: {pri}
  tx_lead: 0.0
  num_pulses: {num_pulses}
  num_presums: {num_presums}
  phase_dithering: {dither}
GENERATE:
  chirp_length: 16.0e-6
  sample_rate: {rate}
  chirp_bandwidth: 100000.0
DEVICE:
  subdev: "A:A"
  clk_ref: internal
  device_args: ""
  clk_rate: {rate}
  tx_channels: "0"
  rx_channels: "0"
  cpu_format: fc32
  otw_format: sc16
GPIO:
  gpio_bank: FP0
  pwr_amp_pin: -1
  ref_out: -1
RF0:
  rx_rate: {rate}
  tx_rate: {rate}
  freq: 450000000.0
  rx_gain: 10.0
  tx_gain: 10.0
  bw: {rate}
  tx_ant: "TX/RX"
  rx_ant: RX2
  transmit: true
RF1:
  rx_rate: {rate}
  tx_rate: {rate}
  freq: 450000000.0
  rx_gain: 10.0
  tx_gain: 10.0
  bw: {rate}
  tx_ant: "TX/RX"
  rx_ant: RX2
FILES:
  chirp_loc: "{chirp_loc}"
  output_dir: "{output_dir}"
  save_loc: save
  gps_loc: gps.txt
  max_chirps_per_file: {max_chirps}
"#,
        time_offset = CFG_TIME_OFFSET,
        pri = PRI,
        num_pulses = scenario.num_pulses,
        num_presums = scenario.num_presums,
        dither = scenario.phase_dither,
        rate = RATE,
        chirp_loc = dir.join("chirp.bin").display(),
        output_dir = dir.display(),
        max_chirps = scenario.max_chirps_per_file,
    );
    Config::parse(&yaml).unwrap()
}

/// Stands in for the operator's Ctrl-C: raises the stop flag the moment the
/// n-th capture comes back, so "stop at pulse n" is exact.
struct StopAfter<R: RxStream> {
    inner: R,
    state: Arc<RunState>,
    remaining: i64,
}

impl<R: RxStream> RxStream for StopAfter<R> {
    fn recv(
        &mut self,
        buf: &mut [Complex<f32>],
        timeout: f64,
    ) -> Result<(usize, RxMetadata), Error> {
        let result = self.inner.recv(buf, timeout);
        self.remaining -= 1;
        if self.remaining <= 0 {
            self.state.request_stop();
        }
        result
    }
}

fn run_scenario(dir: &Path, scenario: Scenario) -> (RunTotals, Arc<RunState>, Config) {
    write_chirp_file(&dir.join("chirp.bin"));
    let config = build_config(dir, &scenario);

    let sim_config = SimulatorConfig {
        tx_rate: RATE,
        rx_rate: RATE,
        start_time: SIM_START_TIME,
        noise: 0.0,
        faults: scenario.faults.clone(),
        seed: 1,
    };
    let (clock, tx, rx_cmd, rx) = create_simulator(sim_config);
    let state = Arc::new(RunState::new());
    let rx = StopAfter {
        inner: rx,
        state: state.clone(),
        remaining: scenario.stop_after.unwrap_or(i64::MAX),
    };

    let options = RunOptions {
        phase_seed: 17,
        recv_timeout: 0.25,
        send_timeout: 1.0,
    };
    let totals = supervisor::run(&config, &clock, tx, rx_cmd, rx, state.clone(), options).unwrap();

    check_invariants(&state, &config);
    (totals, state, config)
}

fn check_invariants(state: &RunState, config: &Config) {
    assert!(state.pulses_received() <= state.pulses_scheduled());
    assert!(state.pulses_scheduled() - state.pulses_received() <= 7);
    let good = state.pulses_received() - state.error_count();
    assert!(state.last_written() <= good);
    if state.last_written() > 0 {
        assert_eq!(state.last_written() % config.chirp.num_presums, 0);
    }
}

fn read_records(path: &Path) -> Vec<Vec<Complex<f32>>> {
    let bytes = fs::read(path).unwrap();
    let record_bytes = RX_SAMPS * 8;
    assert_eq!(bytes.len() % record_bytes, 0, "partial record on disk");
    let mut cursor = Cursor::new(bytes);
    let num_records = cursor.get_ref().len() / record_bytes;
    (0..num_records)
        .map(|_| {
            (0..RX_SAMPS)
                .map(|_| {
                    let re = cursor.read_f32::<LittleEndian>().unwrap();
                    let im = cursor.read_f32::<LittleEndian>().unwrap();
                    Complex::new(re, im)
                })
                .collect()
        })
        .collect()
}

fn assert_records_close(actual: &[Vec<Complex<f32>>], expected: &[Vec<Complex<f32>>], tol: f32) {
    assert_eq!(actual.len(), expected.len());
    for (record, want) in actual.iter().zip(expected) {
        for (a, w) in record.iter().zip(want) {
            assert!(
                (a - w).norm() <= tol,
                "sample differs: got {}, want {}",
                a,
                w
            );
        }
    }
}

#[test]
fn quiet_run_writes_every_pulse() {
    let dir = tempfile::tempdir().unwrap();
    let (totals, _, config) = run_scenario(dir.path(), Scenario::default());

    assert_eq!(totals.error_count, 0);
    assert_eq!(totals.last_pulse_num_written, 10);
    assert_eq!(totals.pulses_received, 10);

    let bytes = fs::metadata(config.save_path()).unwrap().len();
    assert_eq!(bytes, (10 * RX_SAMPS * 8) as u64);

    let records = read_records(&config.save_path());
    let expected = vec![expected_window(); 10];
    assert_records_close(&records, &expected, 1e-5);
}

#[test]
fn presum_fold_averages_groups() {
    let dir = tempfile::tempdir().unwrap();
    let (totals, _, config) = run_scenario(
        dir.path(),
        Scenario {
            num_pulses: 12,
            num_presums: 4,
            ..Scenario::default()
        },
    );

    assert_eq!(totals.error_count, 0);
    assert_eq!(totals.last_pulse_num_written, 12);

    // Twelve identical pulses folded four at a time: three records, each the
    // mean of its group, which is the clean window itself.
    let records = read_records(&config.save_path());
    let expected = vec![expected_window(); 3];
    assert_records_close(&records, &expected, 1e-4);
}

#[test]
fn dither_round_trip_matches_undithered() {
    let quiet_dir = tempfile::tempdir().unwrap();
    let (_, _, quiet_config) = run_scenario(
        quiet_dir.path(),
        Scenario {
            num_pulses: 12,
            num_presums: 4,
            phase_dither: false,
            ..Scenario::default()
        },
    );
    let dithered_dir = tempfile::tempdir().unwrap();
    let (totals, _, dithered_config) = run_scenario(
        dithered_dir.path(),
        Scenario {
            num_pulses: 12,
            num_presums: 4,
            phase_dither: true,
            ..Scenario::default()
        },
    );

    assert_eq!(totals.error_count, 0);
    let quiet = read_records(&quiet_config.save_path());
    let dithered = read_records(&dithered_config.save_path());
    // Applying e^{+i phi} on transmit and e^{-i phi} on receive must cancel.
    assert_records_close(&dithered, &quiet, 1e-3);
}

#[test]
fn injected_error_shifts_time_once() {
    let dir = tempfile::tempdir().unwrap();
    let (totals, state, config) = run_scenario(
        dir.path(),
        Scenario {
            num_pulses: 20,
            faults: vec![(5, InjectedFault::Error(RxError::Overflow))],
            ..Scenario::default()
        },
    );

    assert_eq!(totals.error_count, 1);
    assert_eq!(totals.last_pulse_num_written, 20);
    assert_eq!(totals.pulses_received, 21);
    assert_eq!(state.pulses_scheduled(), 21);

    // The scheduler leaves the failed slot behind by exactly two repetition
    // intervals, once.
    let promoted = CFG_TIME_OFFSET + SIM_START_TIME;
    let shift = state.time_offset() - promoted;
    assert!((shift - 2.0 * PRI).abs() < 1e-9, "shift was {}", shift);

    // Every good pulse still arrived in order and intact.
    let records = read_records(&config.save_path());
    let expected = vec![expected_window(); 20];
    assert_records_close(&records, &expected, 1e-5);
}

#[test]
fn short_buffer_counts_as_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (totals, _, _) = run_scenario(
        dir.path(),
        Scenario {
            num_pulses: 8,
            faults: vec![(2, InjectedFault::Short(RX_SAMPS / 2))],
            ..Scenario::default()
        },
    );
    assert_eq!(totals.error_count, 1);
    assert_eq!(totals.last_pulse_num_written, 8);
    assert_eq!(totals.pulses_received, 9);
}

#[test]
fn rotation_splits_files() {
    let dir = tempfile::tempdir().unwrap();
    let (totals, _, _) = run_scenario(
        dir.path(),
        Scenario {
            num_pulses: 10,
            max_chirps_per_file: 3,
            ..Scenario::default()
        },
    );
    assert_eq!(totals.last_pulse_num_written, 10);

    let record = (RX_SAMPS * 8) as u64;
    let len = |name: &str| fs::metadata(dir.path().join(name)).unwrap().len();
    assert_eq!(len("save.0"), 3 * record);
    assert_eq!(len("save.1"), 3 * record);
    assert_eq!(len("save.2"), 3 * record);
    assert_eq!(len("save.3"), record);
    assert!(!dir.path().join("save.4").exists());
    assert!(!dir.path().join("save").exists());
}

#[test]
fn early_stop_terminates_both_threads() {
    let dir = tempfile::tempdir().unwrap();
    let (totals, state, config) = run_scenario(
        dir.path(),
        Scenario {
            num_pulses: 1000,
            stop_after: Some(50),
            ..Scenario::default()
        },
    );

    assert!(totals.pulses_received >= 50);
    // The look-ahead window bounds how far past the stop point things ran.
    assert!(totals.pulses_received <= 50 + 6);
    assert!(state.stop_requested());

    // The output file was closed with only whole records in it.
    let bytes = fs::metadata(config.save_path()).unwrap().len();
    assert_eq!(bytes % (RX_SAMPS as u64 * 8), 0);
    assert_eq!(bytes / (RX_SAMPS as u64 * 8), totals.last_pulse_num_written as u64);
}

#[test]
fn endless_mode_runs_until_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let (totals, state, _) = run_scenario(
        dir.path(),
        Scenario {
            num_pulses: -1,
            stop_after: Some(20),
            ..Scenario::default()
        },
    );
    assert!(state.stop_requested());
    assert!(totals.pulses_received >= 20);
    assert!(totals.last_pulse_num_written > 0);
}
