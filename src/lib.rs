/// The value table and the Q-learning agent
pub mod algo;

/// Run configuration
pub mod config;

/// Time-decaying hyperparameters
pub mod decay;

/// Error types
pub mod error;

/// Transitions
pub mod exp;

/// Exploration policies
pub mod exploration;

/// Saving and loading the value table
pub mod persist;

/// Per-episode statistics
pub mod report;

/// The episode loop
pub mod scheduler;

/// States and rewards from edge measurements
pub mod sensor;

/// Actions and the signal programs that enact them
pub mod signal;

/// Simulator interface and backends
pub mod sim;

mod util;

pub use config::ControllerConfig;
pub use error::Error;
pub use scheduler::{EpisodeScheduler, Phase, RunSummary};
