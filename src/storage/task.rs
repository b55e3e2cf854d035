use serde::{Deserialize, Serialize};

pub type TaskId = u64;

/// A row of the task list. Owned by the storage collaborator; the raft layer
/// only carries it around as a message payload.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub status: String,
}

impl Task {
    pub fn new(id: TaskId, description: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            status: status.into(),
        }
    }
}
