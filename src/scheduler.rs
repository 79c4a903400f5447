//! The episode loop tying sensing, acting and learning to simulator sessions

use std::path::PathBuf;

use log::{debug, info, trace, warn};
use rand::Rng;
use strum::Display;

use crate::{
    algo::{QTable, QTableAgent},
    config::{ControllerConfig, ErrorPolicy, ScheduleConfig},
    decay::Decay,
    error::{ConfigError, Error, SimError},
    exp::Exp,
    persist,
    report::{EpisodeLog, EpisodeStatus, EpisodeSummary},
    sensor::{EdgeSnapshot, FlowReward, StateExtractor},
    signal::ActionSpace,
    sim::{Session, Simulator},
};

/// Where the scheduler is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Phase {
    Idle,
    SessionStarting,
    Stepping,
    SessionEnding,
    Done,
}

impl Phase {
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, SessionStarting)
                | (Idle, Done)
                | (SessionStarting, Stepping)
                | (SessionStarting, SessionEnding)
                | (Stepping, SessionEnding)
                | (SessionEnding, Idle)
        )
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub episodes: Vec<EpisodeSummary>,
    /// The table as persisted
    pub q_table: QTable,
}

impl RunSummary {
    pub fn completed(&self) -> usize {
        self.episodes
            .iter()
            .filter(|e| e.status == EpisodeStatus::Completed)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.episodes.len() - self.completed()
    }
}

/// Runs a fixed number of fixed-length episodes against a simulator, then
/// persists the learned table
pub struct EpisodeScheduler<D: Decay> {
    scenario: PathBuf,
    schedule: ScheduleConfig,
    extractor: StateExtractor,
    reward: FlowReward,
    actions: ActionSpace,
    agent: QTableAgent<D>,
    output: PathBuf,
    log: Option<EpisodeLog>,
    /// Edges whose vehicle counts are read every tick
    edges: Vec<String>,
    /// Edges whose mean speeds are read as well
    speed_edges: Vec<String>,
    phase: Phase,
}

impl EpisodeScheduler<Box<dyn Decay>> {
    /// Assemble a scheduler from a validated config
    ///
    /// Starts from `initial` when given, otherwise from a zero table.
    pub fn from_config(
        config: &ControllerConfig,
        scenario: PathBuf,
        initial: Option<QTable>,
    ) -> Result<Self, Error> {
        let extractor = config.state_extractor()?;
        let actions = config.action_space()?;
        let q_table = initial
            .unwrap_or_else(|| QTable::zeros(extractor.num_states(), actions.len()));
        let agent = QTableAgent::new(config.agent_config()?, q_table);

        let scheduler = Self::new(
            scenario,
            config.schedule.clone(),
            extractor,
            config.reward(),
            actions,
            agent,
            config.output.q_table.clone(),
        )?;
        match &config.output.episode_log {
            Some(path) => Ok(scheduler.with_episode_log(EpisodeLog::create(path)?)),
            None => Ok(scheduler),
        }
    }
}

impl<D: Decay> EpisodeScheduler<D> {
    pub fn new(
        scenario: PathBuf,
        schedule: ScheduleConfig,
        extractor: StateExtractor,
        reward: FlowReward,
        actions: ActionSpace,
        agent: QTableAgent<D>,
        output: PathBuf,
    ) -> Result<Self, ConfigError> {
        let needed = (extractor.num_states(), actions.len());
        if agent.q_table().shape() != needed {
            return Err(ConfigError::invalid(
                "q_table",
                format!(
                    "table is {:?} but the controller needs {needed:?}",
                    agent.q_table().shape()
                ),
            ));
        }

        let mut edges: Vec<String> = Vec::new();
        for edge in extractor.edges().chain(reward.edges()) {
            if !edges.iter().any(|e| e == edge) {
                edges.push(edge.to_owned());
            }
        }
        let mut speed_edges: Vec<String> = Vec::new();
        for edge in reward.edges() {
            if !speed_edges.iter().any(|e| e == edge) {
                speed_edges.push(edge.to_owned());
            }
        }

        Ok(Self {
            scenario,
            schedule,
            extractor,
            reward,
            actions,
            agent,
            output,
            log: None,
            edges,
            speed_edges,
            phase: Phase::Idle,
        })
    }

    pub fn with_episode_log(mut self, log: EpisodeLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn agent(&self) -> &QTableAgent<D> {
        &self.agent
    }

    fn advance_phase(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal phase change {} -> {next}",
            self.phase
        );
        trace!("phase {} -> {next}", self.phase);
        self.phase = next;
    }

    /// Train for every configured episode and persist the resulting table
    ///
    /// Updates of an episode that fails are rolled back. Under
    /// [`ErrorPolicy::Abort`] the table of the completed episodes is still
    /// persisted before the episode error is returned.
    pub fn run<S, R>(mut self, sim: &mut S, rng: &mut R) -> Result<RunSummary, Error>
    where
        S: Simulator + ?Sized,
        R: Rng + ?Sized,
    {
        let episodes = self.schedule.episodes;
        let mut summaries = Vec::with_capacity(episodes as usize);

        for episode in 0..episodes {
            self.advance_phase(Phase::SessionStarting);
            let checkpoint = self.agent.q_table().clone();
            let mut summary = EpisodeSummary {
                episode,
                status: EpisodeStatus::Failed,
                ticks: 0,
                total_reward: 0.0,
            };

            let outcome = self.run_episode(sim, rng, &mut summary);
            if self.phase != Phase::SessionEnding {
                self.advance_phase(Phase::SessionEnding);
            }
            self.advance_phase(Phase::Idle);

            let logged = match self.log.as_mut() {
                Some(log) => log.record(&summary),
                None => Ok(()),
            };

            match outcome {
                Ok(()) => {
                    info!(
                        "episode {}/{episodes}: reward {:.1} (mean {:.2}), epsilon {:.3}",
                        episode + 1,
                        summary.total_reward,
                        summary.mean_reward(),
                        self.agent.epsilon(),
                    );
                    self.agent.end_episode();
                }
                Err(err) => {
                    self.agent.restore(checkpoint);
                    match self.schedule.on_session_error {
                        ErrorPolicy::Abort => {
                            self.finish()?;
                            return Err(Error::Episode {
                                episode,
                                source: err,
                            });
                        }
                        ErrorPolicy::Skip => {
                            warn!("episode {} abandoned, continuing: {err}", episode + 1);
                        }
                    }
                }
            }
            summaries.push(summary);

            // persist before surfacing a log failure
            if let Err(err) = logged {
                self.finish()?;
                return Err(Error::Report(err));
            }
        }

        self.finish()?;
        Ok(RunSummary {
            episodes: summaries,
            q_table: self.agent.into_q_table(),
        })
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.advance_phase(Phase::Done);
        persist::save(&self.output, self.agent.q_table())?;
        Ok(())
    }

    /// One session: `ticks_per_episode` rounds of sense, act, sense, learn
    fn run_episode<S, R>(
        &mut self,
        sim: &mut S,
        rng: &mut R,
        summary: &mut EpisodeSummary,
    ) -> Result<(), SimError>
    where
        S: Simulator + ?Sized,
        R: Rng + ?Sized,
    {
        let mut session = Session::open(sim, &self.scenario)?;
        self.advance_phase(Phase::Stepping);

        for tick in 0..self.schedule.ticks_per_episode {
            let sim = session.sim();
            sim.advance()?;

            let snapshot = EdgeSnapshot::capture(sim, &self.edges, &self.speed_edges)?;
            let state = self.extractor.state(&snapshot);
            let action = self.agent.act(state, rng);
            sim.set_program(self.actions.tls_id(), self.actions.program(action))?;

            let next = EdgeSnapshot::capture(sim, &self.edges, &self.speed_edges)?;
            let next_state = self.extractor.state(&next);
            let reward = self.reward.reward(&next);

            debug!(
                "tick {tick}: state {state} -> {next_state}, action {action} (green {:.0}%), reward {reward:.2}",
                self.actions.green_proportion(action) * 100.0
            );
            self.agent.learn(Exp {
                state,
                action,
                reward,
                next_state,
            });
            summary.ticks += 1;
            summary.total_reward += reward;
        }
        summary.status = EpisodeStatus::Completed;

        self.advance_phase(Phase::SessionEnding);
        if let Err(err) = session.close() {
            // all updates of this episode already happened
            warn!("closing session of episode {}: {err}", summary.episode + 1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::{
        algo::QTableAgentConfig,
        decay::Constant,
        exploration::EpsilonGreedy,
        sensor::{Discretizer, EdgeReading},
        sim::ScriptedSimulator,
    };

    fn frame(highway: u32, ramp: u32) -> EdgeSnapshot {
        [
            ("H", EdgeReading { vehicles: highway, mean_speed: 20.0 }),
            ("R", EdgeReading { vehicles: ramp, mean_speed: 5.0 }),
        ]
        .into_iter()
        .collect()
    }

    fn scheduler(
        output: &Path,
        episodes: u32,
        ticks: u32,
        policy: ErrorPolicy,
    ) -> EpisodeScheduler<Constant> {
        let extractor =
            StateExtractor::new(100.0, vec!["H".into()], "R".into(), Discretizer::Dominance)
                .unwrap();
        let actions = ActionSpace::from_template("tl".into(), "p{action}", 3).unwrap();
        let agent = QTableAgent::new(
            QTableAgentConfig {
                exploration: EpsilonGreedy::new(Constant::new(0.5)),
                alpha: 0.1,
                gamma: 0.9,
            },
            QTable::zeros(2, 3),
        );
        EpisodeScheduler::new(
            PathBuf::from("merge.sumocfg"),
            ScheduleConfig {
                episodes,
                ticks_per_episode: ticks,
                on_session_error: policy,
            },
            extractor,
            FlowReward::new("H".into(), "R".into()),
            actions,
            agent,
            output.to_owned(),
        )
        .unwrap()
    }

    #[test]
    fn phase_transitions() {
        use Phase::*;
        assert!(Idle.can_advance_to(SessionStarting));
        assert!(SessionStarting.can_advance_to(SessionEnding), "failed start");
        assert!(SessionEnding.can_advance_to(Idle));
        assert!(Idle.can_advance_to(Done));
        assert!(!Stepping.can_advance_to(Done), "sessions always end first");
        assert!(!Done.can_advance_to(Idle));
    }

    #[test]
    fn runs_every_tick_of_every_episode() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("q.npy");
        let mut sim = ScriptedSimulator::new(vec![frame(3, 1), frame(1, 4)]);
        let mut rng = StdRng::seed_from_u64(1);

        let summary = scheduler(&output, 3, 5, ErrorPolicy::Abort)
            .run(&mut sim, &mut rng)
            .unwrap();

        assert_eq!(summary.completed(), 3);
        assert_eq!(sim.starts(), 3);
        assert_eq!(sim.closes(), 3, "one close per session");
        assert_eq!(sim.ticks(), 15);
        assert_eq!(sim.programs().len(), 15, "one switch per tick");
        assert!(sim.programs().iter().all(|(tl, p)| tl == "tl" && p.starts_with('p')));
        assert!(summary.episodes.iter().all(|e| e.ticks == 5));
        assert!(summary.q_table.values().iter().any(|&q| q > 0.0), "rewards were learned");

        let saved = persist::load(&output, (2, 3)).unwrap();
        assert_eq!(saved, summary.q_table, "persisted table is the final table");
    }

    #[test]
    fn failed_start_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("q.npy");
        let mut sim = ScriptedSimulator::new(vec![frame(3, 1)]).fail_start_on(0);
        let mut rng = StdRng::seed_from_u64(1);

        let err = scheduler(&output, 2, 5, ErrorPolicy::Abort)
            .run(&mut sim, &mut rng)
            .unwrap_err();

        assert!(
            matches!(err, Error::Episode { episode: 0, source: SimError::Scripted(_) }),
            "got {err:?}"
        );
        assert_eq!(sim.ticks(), 0, "no tick processed");
        assert_eq!(sim.starts(), 0, "the second episode never ran");
        let saved = persist::load(&output, (2, 3)).unwrap();
        assert_eq!(saved, QTable::zeros(2, 3), "table untouched");
    }

    #[test]
    fn skip_policy_rolls_back_the_failed_episode() {
        let dir = tempfile::tempdir().unwrap();
        let frames = vec![frame(3, 1), frame(1, 4)];
        let mut rng = StdRng::seed_from_u64(9);

        // episode 1 fails on its fourth tick
        let mut flaky = ScriptedSimulator::new(frames.clone()).fail_advance_at(1, 3);
        let skipped = scheduler(&dir.path().join("a.npy"), 3, 5, ErrorPolicy::Skip)
            .run(&mut flaky, &mut rng)
            .unwrap();

        assert_eq!(skipped.completed(), 2);
        assert_eq!(skipped.failed(), 1);
        assert_eq!(skipped.episodes[1].status, EpisodeStatus::Failed);
        assert_eq!(skipped.episodes[1].ticks, 3);
        assert_eq!(flaky.closes(), 3, "the failed session was closed too");
        assert!(!flaky.is_open());
        assert!(skipped.q_table.values().iter().all(|q| q.is_finite()));
    }

    #[test]
    fn abort_keeps_completed_episodes_only() {
        let dir = tempfile::tempdir().unwrap();
        let frames = vec![frame(2, 2)];

        let output = dir.path().join("aborted.npy");
        let mut sim = ScriptedSimulator::new(frames.clone()).fail_advance_at(1, 2);
        let err = scheduler(&output, 3, 4, ErrorPolicy::Abort)
            .run(&mut sim, &mut StdRng::seed_from_u64(5))
            .unwrap_err();
        assert!(matches!(err, Error::Episode { episode: 1, .. }));
        assert_eq!(sim.closes(), 2);
        let aborted = persist::load(&output, (2, 3)).unwrap();

        // the same seed over a single clean episode consumes the same random draws
        let reference_out = dir.path().join("reference.npy");
        let mut clean = ScriptedSimulator::new(frames);
        let reference = scheduler(&reference_out, 1, 4, ErrorPolicy::Abort)
            .run(&mut clean, &mut StdRng::seed_from_u64(5))
            .unwrap();
        assert_eq!(aborted, reference.q_table, "only episode 0 is reflected");
    }

    #[test]
    fn episode_log_failure_still_persists_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let frames = vec![frame(3, 1), frame(1, 4)];

        let output = dir.path().join("q.npy");
        let mut sim = ScriptedSimulator::new(frames.clone());
        let log = EpisodeLog::create(Path::new("/dev/full")).unwrap();
        let err = scheduler(&output, 3, 5, ErrorPolicy::Abort)
            .with_episode_log(log)
            .run(&mut sim, &mut StdRng::seed_from_u64(1))
            .unwrap_err();

        assert!(matches!(err, Error::Report(_)), "got {err:?}");
        assert_eq!(sim.starts(), 1, "stopped after the first episode");
        let saved = persist::load(&output, (2, 3)).unwrap();

        let reference = scheduler(&dir.path().join("reference.npy"), 1, 5, ErrorPolicy::Abort)
            .run(&mut ScriptedSimulator::new(frames), &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(saved, reference.q_table, "the completed episode was kept");
        assert!(saved.values().iter().any(|&q| q != 0.0));
    }

    #[test]
    fn table_shape_must_match_controller() {
        let extractor =
            StateExtractor::new(100.0, vec!["H".into()], "R".into(), Discretizer::Dominance)
                .unwrap();
        let agent = QTableAgent::new(QTableAgentConfig::default(), QTable::zeros(2, 11));
        let result = EpisodeScheduler::new(
            PathBuf::from("x"),
            ScheduleConfig::default(),
            extractor,
            FlowReward::new("H".into(), "R".into()),
            ActionSpace::from_template("tl".into(), "p{action}", 3).unwrap(),
            agent,
            PathBuf::from("q.npy"),
        );
        assert!(matches!(result, Err(ConfigError::Invalid { field: "q_table", .. })));
    }

    #[test]
    fn monitored_edges_are_deduplicated() {
        let s = scheduler(Path::new("q.npy"), 1, 1, ErrorPolicy::Abort);
        assert_eq!(s.edges, ["H", "R"]);
        assert_eq!(s.speed_edges, ["H", "R"]);
        assert_eq!(s.phase(), Phase::Idle);
    }
}
