// Leader election and best-effort replication over in-process mailboxes
pub mod raft;

// Task storage collaborators
pub mod storage;
pub mod config;

// Public exports
pub use config::{Config, SeedTask};
pub use raft::{Cluster, ElectionOutcome, ElectionReport, Mutation, RaftConfig, RaftError};
pub use storage::{StorageConfig, Task, TaskStore};
