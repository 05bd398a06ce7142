//! Typed view of the YAML configuration file.
//!
//! Everything is read once at startup and immutable afterwards. Invalid
//! values are fatal before any thread starts; merely suspicious combinations
//! (rate mismatches, a narrow analog bandwidth) are warned about and the run
//! continues.

use failure::{bail, format_err, Error};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "CHIRP")]
    pub chirp: ChirpParams,
    #[serde(rename = "GENERATE")]
    pub generate: GenerateParams,
    #[serde(rename = "DEVICE")]
    pub device: DeviceParams,
    #[serde(rename = "GPIO")]
    pub gpio: GpioParams,
    #[serde(rename = "RF0")]
    pub rf0: RfParams,
    #[serde(rename = "RF1")]
    pub rf1: RfParams,
    #[serde(rename = "FILES")]
    pub files: FileParams,
}

/// Pulse timing and accumulation parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ChirpParams {
    /// Offset of pulse slot 0, promoted to absolute radio time at start.
    pub time_offset: f64,
    pub tx_duration: f64,
    pub rx_duration: f64,
    pub tr_on_lead: f64,
    pub tr_off_trail: f64,
    pub pulse_rep_int: f64,
    /// How long before the receive window the transmit burst starts.
    pub tx_lead: f64,
    /// Target count of error-free written pulses; -1 runs until stopped.
    pub num_pulses: i64,
    /// Coherent-sum fold factor. 1 means every good pulse is written as-is.
    #[serde(default = "default_num_presums")]
    pub num_presums: i64,
    #[serde(rename = "phase_dithering", default)]
    pub phase_dither: bool,
}

/// Parameters the waveform generator used to produce the chirp file. The
/// acquisition core only consults them for sanity checks.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateParams {
    pub chirp_length: f64,
    pub sample_rate: f64,
    pub chirp_bandwidth: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceParams {
    pub subdev: String,
    pub clk_ref: String,
    pub device_args: String,
    pub clk_rate: f64,
    pub tx_channels: String,
    pub rx_channels: String,
    #[serde(default = "default_cpu_format")]
    pub cpu_format: String,
    pub otw_format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GpioParams {
    pub gpio_bank: String,
    /// DB15 pin driving the power amplifier; -1 disables.
    pub pwr_amp_pin: i32,
    pub ref_out: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RfParams {
    pub rx_rate: f64,
    pub tx_rate: f64,
    pub freq: f64,
    pub rx_gain: f64,
    pub tx_gain: f64,
    pub bw: f64,
    pub tx_ant: String,
    pub rx_ant: String,
    #[serde(default = "default_transmit")]
    pub transmit: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileParams {
    pub chirp_loc: String,
    pub output_dir: String,
    pub save_loc: String,
    pub gps_loc: String,
    /// File rotation threshold; -1 disables rotation.
    pub max_chirps_per_file: i64,
}

fn default_num_presums() -> i64 {
    1
}

fn default_cpu_format() -> String {
    "fc32".to_string()
}

fn default_transmit() -> bool {
    true
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, Error> {
        let text = fs::read_to_string(path)
            .map_err(|e| format_err!("cannot read config file {}: {}", path.display(), e))?;
        Config::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Config, Error> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        config.warn_on_suspicious();
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.chirp.num_presums < 1 {
            bail!("num_presums must be at least 1");
        }
        if self.chirp.time_offset < 0.0 {
            bail!("time_offset [s] must be greater than 0");
        }
        let max = self.files.max_chirps_per_file;
        if max == 0 || max < -1 {
            bail!("max_chirps_per_file must be greater than 0 or equal to -1");
        }
        if self.device.cpu_format != "fc32" {
            // The pipeline's modulation and summing buffers are complex
            // floats; other host formats would need their own code paths.
            bail!(
                "only cpu_format 'fc32' is supported, got '{}'",
                self.device.cpu_format
            );
        }
        Ok(())
    }

    fn warn_on_suspicious(&self) {
        if self.generate.chirp_length > self.chirp.tx_duration {
            log::warn!("TX duration is shorter than chirp duration");
        }
        if self.chirp.rx_duration < self.chirp.tx_duration {
            log::warn!("RX duration is shorter than TX duration");
        }
        if self.rf1.tx_rate != self.rf1.rx_rate {
            log::warn!("TX and RX sample rates differ");
        }
        if self.generate.sample_rate != self.rf1.tx_rate {
            log::warn!("chirp was generated at a different sample rate than the TX rate");
        }
        if self.rf1.bw > 0.0 && self.rf1.bw < self.generate.chirp_bandwidth {
            log::warn!("analog bandwidth is narrower than the chirp bandwidth");
        }
    }

    /// RF parameters for the single channel the pipeline drives.
    pub fn rf(&self) -> &RfParams {
        &self.rf1
    }

    /// Transmit enable comes from the RF0 block.
    pub fn transmit_enabled(&self) -> bool {
        self.rf0.transmit
    }

    pub fn num_tx_samps(&self) -> usize {
        (self.rf1.tx_rate * self.chirp.tx_duration).round() as usize
    }

    pub fn num_rx_samps(&self) -> usize {
        (self.rf1.rx_rate * self.chirp.rx_duration).round() as usize
    }

    pub fn chirp_path(&self) -> PathBuf {
        PathBuf::from(&self.files.chirp_loc)
    }

    pub fn save_path(&self) -> PathBuf {
        Path::new(&self.files.output_dir).join(&self.files.save_loc)
    }

    pub fn gps_path(&self) -> PathBuf {
        Path::new(&self.files.output_dir).join(&self.files.gps_loc)
    }
}

impl GpioParams {
    /// GPIO index of the amp switch; the config names a DB15 connector pin,
    /// which sits two positions above the GPIO numbering.
    pub fn amp_gpio_index(&self) -> i32 {
        self.pwr_amp_pin - 2
    }

    pub fn amp_enabled(&self) -> bool {
        self.amp_gpio_index() >= 0
    }

    pub fn amp_gpio_mask(&self) -> u32 {
        if self.amp_enabled() {
            1u32 << self.amp_gpio_index()
        } else {
            0
        }
    }
}
