use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{StorageError, Task, TaskId, TaskStore};

#[derive(Default)]
struct Rows {
    next_id: TaskId,
    tasks: BTreeMap<TaskId, Task>,
}

/// Volatile store, one per node. Lost on shutdown.
#[derive(Default)]
pub struct MemoryTaskStore {
    rows: Mutex<Rows>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> MutexGuard<'_, Rows> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, description: &str, status: &str) -> Result<TaskId, StorageError> {
        let mut rows = self.rows();
        rows.next_id += 1;
        let id = rows.next_id;
        rows.tasks.insert(id, Task::new(id, description, status));
        Ok(id)
    }

    async fn read(&self, id: TaskId) -> Result<Task, StorageError> {
        self.rows()
            .tasks
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound(id))
    }

    async fn update(&self, task: &Task) -> Result<(), StorageError> {
        let mut rows = self.rows();
        match rows.tasks.get_mut(&task.id) {
            Some(existing) => {
                *existing = task.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(task.id)),
        }
    }

    async fn delete(&self, id: TaskId) -> Result<(), StorageError> {
        self.rows()
            .tasks
            .remove(&id)
            .map(|_| ())
            .ok_or(StorageError::NotFound(id))
    }

    async fn list(&self) -> Result<Vec<Task>, StorageError> {
        Ok(self.rows().tasks.values().cloned().collect())
    }
}
