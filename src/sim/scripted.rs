use std::{collections::BTreeSet, path::Path};

use crate::{
    error::SimError,
    sensor::{EdgeReading, EdgeSnapshot},
};

use super::Simulator;

/// Deterministic in-process simulator that replays a fixed sequence of readings
///
/// After the `n`-th advance of a session, edges report frame `(n - 1) % frames.len()`;
/// before the first advance every edge is empty. Failures can be scripted per
/// session, where sessions are numbered by start attempt from 0.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSimulator {
    frames: Vec<EdgeSnapshot>,
    fail_start: BTreeSet<u32>,
    fail_advance: BTreeSet<(u32, u32)>,
    open: bool,
    session: Option<u32>,
    attempts: u32,
    tick: u32,
    starts: u32,
    closes: u32,
    ticks: u32,
    queries: u32,
    programs: Vec<(String, String)>,
}

impl ScriptedSimulator {
    pub fn new(frames: Vec<EdgeSnapshot>) -> Self {
        Self {
            frames,
            ..Default::default()
        }
    }

    /// Make the `session`-th start attempt fail
    pub fn fail_start_on(mut self, session: u32) -> Self {
        self.fail_start.insert(session);
        self
    }

    /// Make advancing to `tick` (0-based) of the `session`-th session fail
    pub fn fail_advance_at(mut self, session: u32, tick: u32) -> Self {
        self.fail_advance.insert((session, tick));
        self
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Successful starts
    pub fn starts(&self) -> u32 {
        self.starts
    }

    /// Closes of open sessions
    pub fn closes(&self) -> u32 {
        self.closes
    }

    /// Successful advances over all sessions
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// Edge queries over all sessions, counts and speeds separately
    pub fn queries(&self) -> u32 {
        self.queries
    }

    /// Every `(signal, program)` switch requested, in order
    pub fn programs(&self) -> &[(String, String)] {
        &self.programs
    }

    fn ensure_open(&self) -> Result<(), SimError> {
        if self.open {
            Ok(())
        } else {
            Err(SimError::NotStarted)
        }
    }

    fn reading(&mut self, edge: &str) -> Result<EdgeReading, SimError> {
        self.ensure_open()?;
        self.queries += 1;
        if self.frames.is_empty() || self.tick == 0 {
            return Ok(EdgeReading::default());
        }
        let frame = (self.tick as usize - 1) % self.frames.len();
        Ok(self.frames[frame].reading(edge))
    }
}

impl Simulator for ScriptedSimulator {
    fn start(&mut self, _scenario: &Path) -> Result<(), SimError> {
        if self.open {
            return Err(SimError::Scripted("session already open".into()));
        }
        let session = self.attempts;
        self.attempts += 1;
        if self.fail_start.contains(&session) {
            return Err(SimError::Scripted(format!("start of session {session}")));
        }
        self.open = true;
        self.session = Some(session);
        self.tick = 0;
        self.starts += 1;
        Ok(())
    }

    fn advance(&mut self) -> Result<(), SimError> {
        self.ensure_open()?;
        let session = self.session.unwrap_or_default();
        if self.fail_advance.contains(&(session, self.tick)) {
            return Err(SimError::Scripted(format!(
                "tick {} of session {session}",
                self.tick
            )));
        }
        self.tick += 1;
        self.ticks += 1;
        Ok(())
    }

    fn edge_vehicle_count(&mut self, edge: &str) -> Result<u32, SimError> {
        Ok(self.reading(edge)?.vehicles)
    }

    fn edge_mean_speed(&mut self, edge: &str) -> Result<f64, SimError> {
        Ok(self.reading(edge)?.mean_speed)
    }

    fn set_program(&mut self, signal: &str, program: &str) -> Result<(), SimError> {
        self.ensure_open()?;
        self.programs.push((signal.to_owned(), program.to_owned()));
        Ok(())
    }

    fn close(&mut self) -> Result<(), SimError> {
        if self.open {
            self.open = false;
            self.session = None;
            self.closes += 1;
        }
        Ok(())
    }
}
