//! Command-line entry point.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::error;

use rig_daq::config::RigConfig;
use rig_daq::control::HttpControl;
use rig_daq::instrument::EphysRecorder;
use rig_daq::session::SessionRunner;

#[derive(Parser)]
#[command(name = "rig_daq", version, about = "Session orchestration for a data-acquisition rig")]
struct Cli {
    /// Path to the rig configuration file
    #[arg(long, default_value = "rig.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the recording instrument's self-contained smoke sequence
    Pretest,
    /// Run one full orchestrated session
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = RigConfig::load(&cli.config)?;

    let transport = HttpControl::new(config.ephys.host.clone(), config.ephys.port)?;
    let recorder = EphysRecorder::new(Box::new(transport), config.ephys.clone());

    let outcome = match cli.command {
        Command::Pretest => {
            let mut recorder = recorder;
            recorder.pretest(config.session.pretest_duration).await
        }
        Command::Run => {
            let mut session = SessionRunner::new(
                vec![Box::new(recorder)],
                None,
                Vec::new(),
                config.session.duration,
            );
            session.run().await
        }
    };

    if let Err(err) = &outcome {
        error!("{err:#}");
    }
    outcome
}
