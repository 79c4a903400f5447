//! The narrow interface through which the controller drives a traffic simulator

use std::path::Path;

use log::warn;

use crate::error::SimError;

pub mod scripted;
pub mod traci;

pub use scripted::ScriptedSimulator;
pub use traci::{TraciConfig, TraciSimulator};

/// A traffic simulator that can be stepped one tick at a time
///
/// Implementations hold at most one session. Everything except [`start`](Simulator::start)
/// and [`close`](Simulator::close) fails with [`SimError::NotStarted`] outside a session.
pub trait Simulator {
    /// Open a session for the given scenario configuration
    fn start(&mut self, scenario: &Path) -> Result<(), SimError>;

    /// Advance simulated time by one tick
    fn advance(&mut self) -> Result<(), SimError>;

    /// Vehicles on `edge` during the last tick
    fn edge_vehicle_count(&mut self, edge: &str) -> Result<u32, SimError>;

    /// Mean speed on `edge` during the last tick, in m/s
    fn edge_mean_speed(&mut self, edge: &str) -> Result<f64, SimError>;

    /// Request that `signal` switch to the named program
    fn set_program(&mut self, signal: &str, program: &str) -> Result<(), SimError>;

    /// End the session; closing without an open session is a no-op
    fn close(&mut self) -> Result<(), SimError>;
}

/// An open simulator session, closed when dropped
///
/// Use [`Session::close`] on the happy path to observe close errors; the
/// drop path only logs them.
pub struct Session<'s, S: Simulator + ?Sized> {
    sim: &'s mut S,
    open: bool,
}

impl<'s, S: Simulator + ?Sized> Session<'s, S> {
    /// Start a session; nothing needs closing if this fails
    pub fn open(sim: &'s mut S, scenario: &Path) -> Result<Self, SimError> {
        if let Err(err) = sim.start(scenario) {
            // a half-started backend may still own a process
            if let Err(close_err) = sim.close() {
                warn!("closing simulator after failed start: {close_err}");
            }
            return Err(err);
        }
        Ok(Self { sim, open: true })
    }

    pub fn sim(&mut self) -> &mut S {
        &mut *self.sim
    }

    pub fn close(mut self) -> Result<(), SimError> {
        self.open = false;
        self.sim.close()
    }
}

impl<S: Simulator + ?Sized> Drop for Session<'_, S> {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.sim.close() {
                warn!("closing simulator session: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_closes_on_drop() {
        let mut sim = ScriptedSimulator::new(vec![Default::default()]);
        {
            let mut session = Session::open(&mut sim, Path::new("a.sumocfg")).unwrap();
            session.sim().advance().unwrap();
        }
        assert_eq!(sim.starts(), 1);
        assert_eq!(sim.closes(), 1, "dropped session closed once");
        assert!(!sim.is_open());
    }

    #[test]
    fn explicit_close_is_not_repeated_on_drop() {
        let mut sim = ScriptedSimulator::new(vec![Default::default()]);
        let session = Session::open(&mut sim, Path::new("a.sumocfg")).unwrap();
        session.close().unwrap();
        assert_eq!(sim.closes(), 1);
    }

    #[test]
    fn failed_start_yields_no_session() {
        let mut sim = ScriptedSimulator::new(vec![Default::default()]).fail_start_on(0);
        let failed = Session::open(&mut sim, Path::new("a.sumocfg")).is_err();
        assert!(failed);
        assert!(!sim.is_open());
        assert_eq!(sim.ticks(), 0);
    }
}
