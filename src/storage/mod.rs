mod error;
mod memory;
mod sled_store;
mod task;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use self::error::StorageError;
pub use self::memory::MemoryTaskStore;
pub use self::sled_store::SledTaskStore;
pub use self::task::{Task, TaskId};

/// The apply-and-acknowledge collaborator every node writes through.
///
/// Implementations must be safe to call from several node loops at once.
/// Ids handed out by `create` start at 1 and only grow.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, description: &str, status: &str) -> Result<TaskId, StorageError>;

    async fn read(&self, id: TaskId) -> Result<Task, StorageError>;

    async fn update(&self, task: &Task) -> Result<(), StorageError>;

    async fn delete(&self, id: TaskId) -> Result<(), StorageError>;

    /// All tasks, ordered by id.
    async fn list(&self) -> Result<Vec<Task>, StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "sled")]
    Sled { data_dir: String },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory
    }
}

impl StorageConfig {
    /// Directory a sled-backed node keeps its tree in.
    pub fn node_dir(data_dir: &str, node_id: usize) -> PathBuf {
        PathBuf::from(data_dir).join(format!("node-{node_id}"))
    }
}

/// Build the store for one cluster member. Every node gets its own store so
/// that follower storage mirrors the leader's through replication alone.
pub fn create_task_store(
    config: &StorageConfig,
    node_id: usize,
) -> Result<Arc<dyn TaskStore>, StorageError> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(MemoryTaskStore::new())),
        StorageConfig::Sled { data_dir } => {
            let path = StorageConfig::node_dir(data_dir, node_id);
            Ok(Arc::new(SledTaskStore::open(path)?))
        }
    }
}
