use std::{fs::File, path::Path};

use strum::{Display, EnumString};

/// How an episode ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum EpisodeStatus {
    Completed,
    /// Abandoned after a simulator error; its updates were rolled back
    Failed,
}

/// Per-episode statistics
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeSummary {
    pub episode: u32,
    pub status: EpisodeStatus,
    pub ticks: u32,
    pub total_reward: f64,
}

impl EpisodeSummary {
    pub fn mean_reward(&self) -> f64 {
        if self.ticks == 0 {
            0.0
        } else {
            self.total_reward / self.ticks as f64
        }
    }
}

/// CSV log with one row per episode
pub struct EpisodeLog {
    writer: csv::Writer<File>,
}

impl EpisodeLog {
    pub fn create(path: &Path) -> Result<Self, csv::Error> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["episode", "status", "ticks", "total_reward", "mean_reward"])?;
        Ok(Self { writer })
    }

    pub fn record(&mut self, summary: &EpisodeSummary) -> Result<(), csv::Error> {
        self.writer.write_record(&[
            summary.episode.to_string(),
            summary.status.to_string(),
            summary.ticks.to_string(),
            summary.total_reward.to_string(),
            summary.mean_reward().to_string(),
        ])?;
        // rows survive a crash in a later episode
        self.writer.flush()?;
        Ok(())
    }
}
