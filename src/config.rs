use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::raft::RaftConfig;
use crate::storage::StorageConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub raft: RaftConfig,
    pub storage: StorageConfig,
    pub seed_tasks: Vec<SeedTask>,
}

/// Task loaded into the cluster once a leader is up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedTask {
    pub description: String,
    pub status: String,
}

impl SeedTask {
    pub fn new(description: &str, status: &str) -> Self {
        Self {
            description: description.to_string(),
            status: status.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            raft: RaftConfig::default(),
            storage: StorageConfig::default(),
            seed_tasks: vec![
                SeedTask::new("Task 11", "Pending"),
                SeedTask::new("Task 21", "Completed"),
            ],
        }
    }
}

impl Config {
    /// Read a JSON config file. Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
