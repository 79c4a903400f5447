use super::{EdgeReading, EdgeSnapshot};

/// Throughput reward: mean speed times vehicle count, summed over the highway and ramp segments
#[derive(Debug, Clone)]
pub struct FlowReward {
    highway_edge: String,
    ramp_edge: String,
}

impl FlowReward {
    pub fn new(highway_edge: String, ramp_edge: String) -> Self {
        Self {
            highway_edge,
            ramp_edge,
        }
    }

    pub fn edges(&self) -> impl Iterator<Item = &str> {
        [self.highway_edge.as_str(), self.ramp_edge.as_str()].into_iter()
    }

    pub fn reward(&self, snapshot: &EdgeSnapshot) -> f64 {
        flow(snapshot.reading(&self.highway_edge)) + flow(snapshot.reading(&self.ramp_edge))
    }
}

fn flow(reading: EdgeReading) -> f64 {
    if reading.vehicles == 0 {
        // SUMO reports the speed limit on empty edges
        return 0.0;
    }
    reading.mean_speed * reading.vehicles as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_segment_flows() {
        let snapshot: EdgeSnapshot = [
            ("J", EdgeReading { vehicles: 3, mean_speed: 20.0 }),
            ("R", EdgeReading { vehicles: 2, mean_speed: 5.5 }),
            ("other", EdgeReading { vehicles: 50, mean_speed: 30.0 }),
        ]
        .into_iter()
        .collect();
        let reward = FlowReward::new("J".into(), "R".into());
        assert_eq!(reward.reward(&snapshot), 3.0 * 20.0 + 2.0 * 5.5);
    }

    #[test]
    fn empty_edges_contribute_nothing() {
        let snapshot: EdgeSnapshot = [
            ("J", EdgeReading { vehicles: 0, mean_speed: 33.3 }),
            ("R", EdgeReading { vehicles: 0, mean_speed: f64::NAN }),
        ]
        .into_iter()
        .collect();
        let reward = FlowReward::new("J".into(), "R".into()).reward(&snapshot);
        assert_eq!(reward, 0.0, "no vehicles, no flow, no NaN");
    }
}
