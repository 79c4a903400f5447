//! Turning simulator readings into states and rewards

use std::collections::{BTreeMap, BTreeSet};

use crate::{error::SimError, sim::Simulator};

pub mod reward;
pub mod state;

pub use reward::FlowReward;
pub use state::{Densities, Discretizer, StateExtractor};

/// Last-step measurements of a single edge
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EdgeReading {
    pub vehicles: u32,
    /// Mean speed in m/s
    pub mean_speed: f64,
}

/// Read-only view of the monitored edges after one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeSnapshot {
    readings: BTreeMap<String, EdgeReading>,
}

impl EdgeSnapshot {
    /// Query vehicle counts of `edges` and `speed_edges`, mean speeds of `speed_edges` only
    ///
    /// Edges read for their count alone report a mean speed of 0.
    pub fn capture<S, I, J>(sim: &mut S, edges: I, speed_edges: J) -> Result<Self, SimError>
    where
        S: Simulator + ?Sized,
        I: IntoIterator,
        I::Item: AsRef<str>,
        J: IntoIterator,
        J::Item: AsRef<str>,
    {
        let mut readings = BTreeMap::new();
        for edge in edges {
            let edge = edge.as_ref();
            if !readings.contains_key(edge) {
                let vehicles = sim.edge_vehicle_count(edge)?;
                readings.insert(edge.to_owned(), EdgeReading { vehicles, mean_speed: 0.0 });
            }
        }

        let mut timed = BTreeSet::new();
        for edge in speed_edges {
            let edge = edge.as_ref();
            if !timed.insert(edge.to_owned()) {
                continue;
            }
            let mean_speed = sim.edge_mean_speed(edge)?;
            match readings.get_mut(edge) {
                Some(reading) => reading.mean_speed = mean_speed,
                None => {
                    let vehicles = sim.edge_vehicle_count(edge)?;
                    readings.insert(edge.to_owned(), EdgeReading { vehicles, mean_speed });
                }
            }
        }
        Ok(Self { readings })
    }

    /// The reading for `edge`; edges that were not captured read as empty
    pub fn reading(&self, edge: &str) -> EdgeReading {
        self.readings.get(edge).copied().unwrap_or_default()
    }

    pub fn vehicles(&self, edge: &str) -> u32 {
        self.reading(edge).vehicles
    }

    pub fn insert(&mut self, edge: impl Into<String>, reading: EdgeReading) {
        self.readings.insert(edge.into(), reading);
    }
}

impl<K: Into<String>> FromIterator<(K, EdgeReading)> for EdgeSnapshot {
    fn from_iter<T: IntoIterator<Item = (K, EdgeReading)>>(iter: T) -> Self {
        Self {
            readings: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
