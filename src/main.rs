//! Trains the ramp signal controller against SUMO and writes the learned table

use std::{error::Error as _, fs::File, path::PathBuf, process::ExitCode};

use clap::Parser;
use log::{error, info};
use rand::{rngs::StdRng, SeedableRng};

use ramp_rl::{
    config::ErrorPolicy,
    error::ConfigError,
    persist,
    sim::TraciSimulator,
    ControllerConfig, EpisodeScheduler, Error,
};

/// Q-learning controller for a highway on-ramp traffic signal
#[derive(Parser, Debug)]
#[command(name = "ramp-rl", version)]
struct Cli {
    /// SUMO scenario configuration (.sumocfg)
    scenario: PathBuf,

    /// TOML file overriding the built-in defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of episodes to train for
    #[arg(long)]
    episodes: Option<u32>,

    /// Where to write the learned table (.npy)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Optional CSV file with one row per episode
    #[arg(long)]
    episode_log: Option<PathBuf>,

    /// Seed for the exploration policy; random if omitted
    #[arg(long)]
    seed: Option<u64>,

    /// What to do when a simulator session fails
    #[arg(long, value_enum)]
    on_session_error: Option<ErrorPolicy>,

    /// Continue training from a previously saved table
    #[arg(long)]
    resume: Option<PathBuf>,
}

fn build_config(cli: &Cli) -> Result<ControllerConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => ControllerConfig::load(path)?,
        None => ControllerConfig::default(),
    };

    if let Some(episodes) = cli.episodes {
        config.schedule.episodes = episodes;
    }
    if let Some(policy) = cli.on_session_error {
        config.schedule.on_session_error = policy;
    }
    if let Some(output) = &cli.output {
        config.output.q_table = output.clone();
    }
    if let Some(log) = &cli.episode_log {
        config.output.episode_log = Some(log.clone());
    }

    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<(), Error> {
    File::open(&cli.scenario).map_err(|source| ConfigError::Read {
        what: "scenario file",
        path: cli.scenario.clone(),
        source,
    })?;
    let config = build_config(&cli)?;

    let initial = match &cli.resume {
        Some(path) => {
            let shape = (
                config.state_extractor()?.num_states(),
                config.action_space()?.len(),
            );
            let table = persist::load(path, shape)?;
            info!("resuming from {}", path.display());
            Some(table)
        }
        None => None,
    };

    let scheduler = EpisodeScheduler::from_config(&config, cli.scenario, initial)?;
    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut sim = TraciSimulator::new(config.sumo.traci());

    let summary = scheduler.run(&mut sim, &mut rng)?;
    info!(
        "completed {} of {} episodes ({} failed)",
        summary.completed(),
        summary.episodes.len(),
        summary.failed()
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            let mut source = err.source();
            while let Some(cause) = source {
                error!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
