use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    pub cluster_size: usize,
    pub vote_timeout_ms: u64, // upper bound on the tally wait
    pub settle_delay_ms: u64, // pause before a re-election starts
}

impl RaftConfig {
    pub fn new(cluster_size: usize) -> Self {
        Self {
            cluster_size,
            ..Self::default()
        }
    }

    pub fn with_timings(mut self, vote_timeout_ms: u64, settle_delay_ms: u64) -> Self {
        self.vote_timeout_ms = vote_timeout_ms;
        self.settle_delay_ms = settle_delay_ms;
        self
    }

    pub fn vote_timeout(&self) -> Duration {
        Duration::from_millis(self.vote_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Votes needed to win, own vote included.
    pub fn majority(&self) -> usize {
        majority(self.cluster_size)
    }
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            cluster_size: 4,
            vote_timeout_ms: 200,
            settle_delay_ms: 500,
        }
    }
}

pub fn majority(cluster_size: usize) -> usize {
    cluster_size / 2 + 1
}
