use clap::Parser;
use failure::Error;
use pulse_radar::config::Config;
use pulse_radar::gps;
use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// NMEA GPS position logger.
///
/// Configures a u-blox receiver for GGA-only output and appends one
/// `<epoch_microseconds>,<lat>,<lon>,<alt>` line per fix to the gps_loc file
/// from the shared configuration.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Opt {
    /// Path to the YAML configuration file
    #[arg(default_value = "config/default.yaml")]
    config: PathBuf,

    /// Serial device the receiver is attached to
    #[arg(long, default_value = "/dev/ttyACM0")]
    port: String,

    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Solution rate to request from the receiver, Hz
    #[arg(long, default_value_t = 3)]
    rate: u16,

    /// Skip the UBX configuration pass
    #[arg(long)]
    no_configure: bool,

    /// More stderr diagnostics (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("pulse_radar")
        .verbosity(opt.verbose as usize + 2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .ok();

    if let Err(err) = run(&opt) {
        log::error!("fatal: {}", err);
        process::exit(1);
    }
}

fn run(opt: &Opt) -> Result<(), Error> {
    let config = Config::load(&opt.config)?;
    let out_path = config.gps_path();

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.store(true, Ordering::Relaxed))?;

    log::info!("opening serial port {} at {} baud", opt.port, opt.baud);
    let mut port = serialport::new(opt.port.as_str(), opt.baud)
        .timeout(Duration::from_secs(2))
        .open()?;

    if !opt.no_configure {
        log::info!("configuring receiver: {} Hz, GGA only", opt.rate);
        gps::configure(port.as_mut(), opt.rate)?;
    }

    let mut out = File::create(&out_path)?;
    log::info!("reading NMEA data into {}", out_path.display());
    gps::collect(port, &mut out, &stop)?;
    Ok(())
}
