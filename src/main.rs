use clap::Parser;
use failure::Error;
use pulse_radar::config::Config;
use pulse_radar::simulator::{create_simulator, SimulatorConfig};
use pulse_radar::state::RunState;
use pulse_radar::supervisor::{self, RunOptions};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// Coherent pulsed radar acquisition.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Opt {
    /// Path to the YAML configuration file
    #[arg(default_value = "config/default.yaml")]
    config: PathBuf,

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
    log::info!("reading config file {}", opt.config.display());
    let config = Config::load(&opt.config)?;

    let state = Arc::new(RunState::new());
    let handler_state = state.clone();
    ctrlc::set_handler(move || handler_state.request_stop())?;

    // The default build carries no hardware front-end; the loopback
    // simulator stands in behind the same traits.
    let sim_config = SimulatorConfig {
        tx_rate: config.rf().tx_rate,
        rx_rate: config.rf().rx_rate,
        ..SimulatorConfig::default()
    };
    let (clock, tx, rx_cmd, rx) = create_simulator(sim_config);

    supervisor::run(&config, &clock, tx, rx_cmd, rx, state, RunOptions::default())?;
    Ok(())
}
