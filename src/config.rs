use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;
use strum::{Display, EnumString};

use crate::{
    algo::QTableAgentConfig,
    decay::{self, Decay},
    error::ConfigError,
    exploration::EpsilonGreedy,
    sensor::{Discretizer, FlowReward, StateExtractor},
    signal::ActionSpace,
    sim::TraciConfig,
    util::check_unit_interval,
};

/// Everything a training run can be configured with
///
/// Every section is optional in the TOML file; the defaults describe the
/// J15 merge scenario with 2 states and 11 actions.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    pub learning: LearningConfig,
    pub exploration: ExplorationConfig,
    pub schedule: ScheduleConfig,
    pub network: NetworkConfig,
    pub signal: SignalConfig,
    pub sumo: SumoConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LearningConfig {
    /// Learning rate
    pub alpha: f64,
    /// Discount factor
    pub gamma: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            gamma: 0.9,
        }
    }
}

/// Epsilon schedule of the epsilon greedy policy
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "schedule", rename_all = "snake_case")]
pub enum ExplorationConfig {
    Constant { epsilon: f64 },
    Exponential { rate: f64, start: f64, end: f64 },
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self::Constant { epsilon: 0.2 }
    }
}

impl ExplorationConfig {
    pub fn build(&self) -> Result<Box<dyn Decay>, ConfigError> {
        match *self {
            Self::Constant { epsilon } => {
                check_unit_interval("exploration.epsilon", epsilon)?;
                Ok(Box::new(decay::Constant::new(epsilon)))
            }
            Self::Exponential { rate, start, end } => {
                check_unit_interval("exploration.start", start)?;
                check_unit_interval("exploration.end", end)?;
                Ok(Box::new(decay::Exponential::new(rate, start, end)?))
            }
        }
    }
}

/// What to do with the run when a simulator session fails mid-episode
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Display, EnumString, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop training, keeping the episodes completed so far
    #[default]
    Abort,
    /// Discard the failed episode and continue with the next one
    Skip,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    pub episodes: u32,
    pub ticks_per_episode: u32,
    pub on_session_error: ErrorPolicy,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            episodes: 1000,
            ticks_per_episode: 60,
            on_session_error: ErrorPolicy::Abort,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Metres of lane used to turn vehicle counts into densities
    pub lane_length: f64,
    pub highway_edges: Vec<String>,
    pub ramp_edge: String,
    /// Highway edge whose flow counts towards the reward
    pub reward_highway_edge: String,
    pub discretizer: Discretizer,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            lane_length: 500.0,
            highway_edges: [":J15_0", ":J15_3", "E10", "E8", "E9"]
                .map(String::from)
                .to_vec(),
            ramp_edge: "E9".into(),
            reward_highway_edge: ":J15_0".into(),
            discretizer: Discretizer::Dominance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignalConfig {
    /// Traffic light whose program is switched
    pub tls_id: String,
    pub num_actions: usize,
    /// Program name per action, `{action}` replaced by the action index
    pub program_template: String,
    /// Explicit program names; replaces `num_actions` and `program_template`
    pub programs: Option<Vec<String>>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            tls_id: "traffic_light".into(),
            num_actions: 11,
            program_template: "program_{action}".into(),
            programs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SumoConfig {
    pub binary: String,
    pub port: u16,
    pub extra_args: Vec<String>,
    pub connect_attempts: u32,
    pub connect_backoff_ms: u64,
    pub step_timeout_secs: u64,
}

impl Default for SumoConfig {
    fn default() -> Self {
        let traci = TraciConfig::default();
        Self {
            binary: traci.binary,
            port: traci.port,
            extra_args: traci.extra_args,
            connect_attempts: traci.connect_attempts,
            connect_backoff_ms: traci.connect_backoff.as_millis() as u64,
            step_timeout_secs: traci.step_timeout.as_secs(),
        }
    }
}

impl SumoConfig {
    pub fn traci(&self) -> TraciConfig {
        TraciConfig {
            binary: self.binary.clone(),
            port: self.port,
            extra_args: self.extra_args.clone(),
            connect_attempts: self.connect_attempts,
            connect_backoff: Duration::from_millis(self.connect_backoff_ms),
            step_timeout: Duration::from_secs(self.step_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub q_table: PathBuf,
    pub episode_log: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            q_table: PathBuf::from("q_table.npy"),
            episode_log: None,
        }
    }
}

impl ControllerConfig {
    /// Read and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            what: "config file",
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the run meaningless or divide by zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit_interval("learning.alpha", self.learning.alpha)?;
        check_unit_interval("learning.gamma", self.learning.gamma)?;
        self.exploration.build()?;
        if self.schedule.ticks_per_episode == 0 {
            return Err(ConfigError::invalid(
                "schedule.ticks_per_episode",
                "an episode needs at least one tick",
            ));
        }
        self.state_extractor()?;
        self.action_space()?;
        if self.sumo.step_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "sumo.step_timeout_secs",
                "a zero timeout would fail every step",
            ));
        }
        Ok(())
    }

    pub fn state_extractor(&self) -> Result<StateExtractor, ConfigError> {
        let network = &self.network;
        StateExtractor::new(
            network.lane_length,
            network.highway_edges.clone(),
            network.ramp_edge.clone(),
            network.discretizer.clone(),
        )
    }

    pub fn reward(&self) -> FlowReward {
        FlowReward::new(
            self.network.reward_highway_edge.clone(),
            self.network.ramp_edge.clone(),
        )
    }

    pub fn action_space(&self) -> Result<ActionSpace, ConfigError> {
        let signal = &self.signal;
        match &signal.programs {
            Some(programs) => ActionSpace::new(signal.tls_id.clone(), programs.clone()),
            None => ActionSpace::from_template(
                signal.tls_id.clone(),
                &signal.program_template,
                signal.num_actions,
            ),
        }
    }

    pub fn agent_config(&self) -> Result<QTableAgentConfig<Box<dyn Decay>>, ConfigError> {
        Ok(QTableAgentConfig {
            exploration: EpsilonGreedy::new(self.exploration.build()?),
            alpha: self.learning.alpha,
            gamma: self.learning.gamma,
        })
    }
}
