use log::debug;
use serde::Deserialize;

use crate::error::ConfigError;

use super::EdgeSnapshot;

/// Continuous traffic state, in vehicles per metre of lane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Densities {
    pub highway: f64,
    pub ramp: f64,
}

/// Maps a [`Densities`] pair onto a table row
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discretizer {
    /// Two states: 0 when the highway is at least as dense as the ramp, 1 otherwise
    #[default]
    Dominance,
    /// Bins each density by ascending `thresholds`; `(k + 1)^2` states for `k` thresholds
    Grid { thresholds: Vec<f64> },
}

impl Discretizer {
    pub fn num_states(&self) -> usize {
        match self {
            Self::Dominance => 2,
            Self::Grid { thresholds } => (thresholds.len() + 1).pow(2),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Self::Grid { thresholds } = self {
            if thresholds.iter().any(|t| !t.is_finite()) {
                return Err(ConfigError::invalid(
                    "network.discretizer.thresholds",
                    "thresholds must be finite",
                ));
            }
            if thresholds.windows(2).any(|w| w[0] >= w[1]) {
                return Err(ConfigError::invalid(
                    "network.discretizer.thresholds",
                    "thresholds must be strictly ascending",
                ));
            }
        }
        Ok(())
    }

    /// State index in `[0, num_states)`
    pub fn index(&self, densities: Densities) -> usize {
        match self {
            Self::Dominance => usize::from(densities.highway < densities.ramp),
            Self::Grid { thresholds } => {
                let bin = |x: f64| thresholds.iter().take_while(|&&t| t <= x).count();
                bin(densities.highway) * (thresholds.len() + 1) + bin(densities.ramp)
            }
        }
    }
}

/// Computes densities of a fixed set of highway edges and one ramp edge
#[derive(Debug, Clone)]
pub struct StateExtractor {
    lane_length: f64,
    highway_edges: Vec<String>,
    ramp_edge: String,
    discretizer: Discretizer,
}

impl StateExtractor {
    /// Rejects configurations that would divide by zero
    pub fn new(
        lane_length: f64,
        highway_edges: Vec<String>,
        ramp_edge: String,
        discretizer: Discretizer,
    ) -> Result<Self, ConfigError> {
        if !(lane_length > 0.0 && lane_length.is_finite()) {
            return Err(ConfigError::invalid(
                "network.lane_length",
                format!("{lane_length} is not a positive length"),
            ));
        }
        if highway_edges.is_empty() {
            return Err(ConfigError::invalid(
                "network.highway_edges",
                "at least one highway edge is required",
            ));
        }
        discretizer.validate()?;
        Ok(Self {
            lane_length,
            highway_edges,
            ramp_edge,
            discretizer,
        })
    }

    pub fn num_states(&self) -> usize {
        self.discretizer.num_states()
    }

    /// Every edge this extractor reads
    pub fn edges(&self) -> impl Iterator<Item = &str> {
        self.highway_edges
            .iter()
            .chain(std::iter::once(&self.ramp_edge))
            .map(String::as_str)
    }

    pub fn densities(&self, snapshot: &EdgeSnapshot) -> Densities {
        let mut total = 0u64;
        for edge in &self.highway_edges {
            let vehicles = snapshot.vehicles(edge);
            debug!("density on edge {edge}: {}", vehicles as f64 / self.lane_length);
            total += u64::from(vehicles);
        }

        Densities {
            highway: total as f64 / (self.lane_length * self.highway_edges.len() as f64),
            ramp: snapshot.vehicles(&self.ramp_edge) as f64 / self.lane_length,
        }
    }

    pub fn state(&self, snapshot: &EdgeSnapshot) -> usize {
        self.discretizer.index(self.densities(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::sensor::EdgeReading;

    fn snapshot(counts: &[(&str, u32)]) -> EdgeSnapshot {
        counts
            .iter()
            .map(|&(edge, vehicles)| {
                (
                    edge,
                    EdgeReading {
                        vehicles,
                        mean_speed: 10.0,
                    },
                )
            })
            .collect()
    }

    fn extractor(discretizer: Discretizer) -> StateExtractor {
        StateExtractor::new(
            500.0,
            vec!["H1".into(), "H2".into()],
            "R".into(),
            discretizer,
        )
        .unwrap()
    }

    #[test]
    fn merge_densities() {
        let ex = extractor(Discretizer::Dominance);
        let d = ex.densities(&snapshot(&[("H1", 5), ("H2", 5), ("R", 10)]));
        assert_eq!(d.highway, 0.01, "10 / (500 * 2)");
        assert_eq!(d.ramp, 0.02, "10 / 500");
        assert_eq!(ex.state(&snapshot(&[("H1", 5), ("H2", 5), ("R", 10)])), 1, "ramp dominant");
    }

    #[test]
    fn empty_road_is_zero_density() {
        let ex = extractor(Discretizer::Dominance);
        let d = ex.densities(&snapshot(&[]));
        assert_eq!(d, Densities { highway: 0.0, ramp: 0.0 });
        assert_eq!(ex.state(&snapshot(&[])), 0, "ties are highway dominant");
    }

    #[test]
    fn ramp_may_also_be_a_highway_edge() {
        let ex = StateExtractor::new(
            500.0,
            vec!["E8".into(), "E9".into()],
            "E9".into(),
            Discretizer::Dominance,
        )
        .unwrap();
        let d = ex.densities(&snapshot(&[("E8", 2), ("E9", 4)]));
        assert_eq!(d.highway, 6.0 / 1000.0);
        assert_eq!(d.ramp, 4.0 / 500.0);
        assert_eq!(ex.edges().collect::<Vec<_>>(), ["E8", "E9", "E9"]);
    }

    #[test]
    fn degenerate_configurations_are_rejected() {
        let bad_length = StateExtractor::new(0.0, vec!["H".into()], "R".into(), Discretizer::Dominance);
        assert!(matches!(bad_length, Err(ConfigError::Invalid { field: "network.lane_length", .. })));

        let no_edges = StateExtractor::new(500.0, vec![], "R".into(), Discretizer::Dominance);
        assert!(matches!(no_edges, Err(ConfigError::Invalid { field: "network.highway_edges", .. })));

        let unsorted = StateExtractor::new(
            500.0,
            vec!["H".into()],
            "R".into(),
            Discretizer::Grid { thresholds: vec![0.02, 0.01] },
        );
        assert!(unsorted.is_err());
    }

    #[test]
    fn grid_bins_each_density() {
        let grid = Discretizer::Grid { thresholds: vec![0.01, 0.05] };
        assert_eq!(grid.num_states(), 9);
        assert_eq!(grid.index(Densities { highway: 0.0, ramp: 0.0 }), 0);
        assert_eq!(grid.index(Densities { highway: 0.01, ramp: 0.0 }), 3, "threshold is inclusive");
        assert_eq!(grid.index(Densities { highway: 0.2, ramp: 0.03 }), 7);
        assert_eq!(grid.index(Densities { highway: 1.0, ramp: 1.0 }), 8);
    }

    proptest! {
        #[test]
        fn density_is_linear_in_count(count in 0u32..100_000, factor in 0u32..50) {
            let ex = extractor(Discretizer::Dominance);
            let one = ex.densities(&snapshot(&[("R", count)])).ramp;
            let scaled = ex.densities(&snapshot(&[("R", count * factor)])).ramp;
            prop_assert!(one >= 0.0);
            prop_assert!((scaled - one * factor as f64).abs() <= 1e-9 * scaled.max(1.0));
        }

        #[test]
        fn state_index_in_range(
            highway in 0.0f64..10.0,
            ramp in 0.0f64..10.0,
            thresholds in prop::collection::btree_set(0u32..1000, 0..6),
        ) {
            let d = Densities { highway, ramp };
            prop_assert!(Discretizer::Dominance.index(d) < 2);

            let grid = Discretizer::Grid {
                thresholds: thresholds.into_iter().map(|t| t as f64 / 100.0).collect(),
            };
            prop_assert!(grid.index(d) < grid.num_states());
        }
    }
}
