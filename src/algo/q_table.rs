use log::trace;
use rand::Rng;

use crate::{
    assert_interval,
    decay::{self, Decay},
    exp::Exp,
    exploration::{Choice, EpsilonGreedy},
};

/// Dense `num_states x num_actions` table of action values, stored row major
#[derive(Debug, Clone, PartialEq)]
pub struct QTable {
    values: Vec<f64>,
    num_states: usize,
    num_actions: usize,
}

impl QTable {
    /// A zero-initialized table
    ///
    /// **Panics** if either dimension is zero
    pub fn zeros(num_states: usize, num_actions: usize) -> Self {
        assert!(
            num_states > 0 && num_actions > 0,
            "Q table dimensions must be non-zero, got {num_states}x{num_actions}"
        );
        Self {
            values: vec![0.0; num_states * num_actions],
            num_states,
            num_actions,
        }
    }

    /// Wrap row-major `values`, returning `None` if the length does not match the shape
    pub fn from_values(num_states: usize, num_actions: usize, values: Vec<f64>) -> Option<Self> {
        (num_states > 0 && num_actions > 0 && values.len() == num_states * num_actions).then_some(
            Self {
                values,
                num_states,
                num_actions,
            },
        )
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.num_states, self.num_actions)
    }

    /// All values in row-major order
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, state: usize, action: usize) -> f64 {
        self.row(state)[action]
    }

    pub fn set(&mut self, state: usize, action: usize, value: f64) {
        let i = self.index(state, action);
        self.values[i] = value;
    }

    /// Action values of a single state
    pub fn row(&self, state: usize) -> &[f64] {
        let start = state * self.num_actions;
        &self.values[start..start + self.num_actions]
    }

    /// Index of the first maximum in the state's row
    pub fn best_action(&self, state: usize) -> usize {
        self.row(state)
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(best, max), (i, &q)| {
                if q > max {
                    (i, q)
                } else {
                    (best, max)
                }
            })
            .0
    }

    /// Largest value in the state's row
    pub fn best_value(&self, state: usize) -> f64 {
        self.row(state)
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    fn index(&self, state: usize, action: usize) -> usize {
        assert!(
            state < self.num_states && action < self.num_actions,
            "({state}, {action}) is outside a {}x{} table",
            self.num_states,
            self.num_actions,
        );
        state * self.num_actions + action
    }
}

/// Configuration for the [`QTableAgent`]
pub struct QTableAgentConfig<D: Decay> {
    pub exploration: EpsilonGreedy<D>,
    pub alpha: f64,
    pub gamma: f64,
}

impl Default for QTableAgentConfig<decay::Constant> {
    fn default() -> Self {
        Self {
            exploration: EpsilonGreedy::new(decay::Constant::new(0.2)),
            alpha: 0.1,
            gamma: 0.9,
        }
    }
}

/// A Q-learning agent over a dense table of discretized states and indexed actions
pub struct QTableAgent<D: Decay> {
    q_table: QTable,
    exploration: EpsilonGreedy<D>,
    alpha: f64,   // learning rate
    gamma: f64,   // discount factor
    episode: u32, // completed episodes
}

impl<D: Decay> QTableAgent<D> {
    /// Initialize a new agent over an existing table
    ///
    /// **Panics** if `alpha` or `gamma` is not in the interval `[0,1]`
    pub fn new(config: QTableAgentConfig<D>, q_table: QTable) -> Self {
        assert_interval!(config.alpha, 0.0, 1.0);
        assert_interval!(config.gamma, 0.0, 1.0);
        Self {
            q_table,
            exploration: config.exploration,
            alpha: config.alpha,
            gamma: config.gamma,
            episode: 0,
        }
    }

    pub fn q_table(&self) -> &QTable {
        &self.q_table
    }

    pub fn into_q_table(self) -> QTable {
        self.q_table
    }

    /// Replace the table, e.g. to roll back the updates of an abandoned episode
    pub fn restore(&mut self, q_table: QTable) {
        assert_eq!(q_table.shape(), self.q_table.shape(), "table shape is fixed");
        self.q_table = q_table;
    }

    pub fn episode(&self) -> u32 {
        self.episode
    }

    pub fn epsilon(&self) -> f64 {
        self.exploration.epsilon(self.episode)
    }

    /// Mark an episode as completed, advancing the exploration schedule
    pub fn end_episode(&mut self) {
        self.episode += 1;
    }

    /// Choose an action for `state` with the epsilon greedy policy
    pub fn act<R: Rng + ?Sized>(&self, state: usize, rng: &mut R) -> usize {
        match self.exploration.choose(self.episode, rng) {
            Choice::Explore => rng.gen_range(0..self.q_table.num_actions()),
            Choice::Exploit => self.q_table.best_action(state),
        }
    }

    /// One-step Bellman update from a single transition
    pub fn learn(&mut self, experience: Exp) {
        let Exp {
            state,
            action,
            reward,
            next_state,
        } = experience;

        let q_value = self.q_table.get(state, action);
        let max_next_q = self.q_table.best_value(next_state);
        let updated = q_value + self.alpha * (reward + self.gamma * max_next_q - q_value);
        trace!("Q[{state}][{action}]: {q_value} -> {updated}");

        self.q_table.set(state, action, updated);
    }
}
