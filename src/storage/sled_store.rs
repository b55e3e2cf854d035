use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{StorageError, Task, TaskId, TaskStore};

const TASKS_TREE: &str = "tasks";
const META_TREE: &str = "__meta__";
const NEXT_ID_KEY: &[u8] = b"__next_id__";

/// Durable task store backed by sled.
///
/// Rows are bincode-encoded `Task`s keyed by the big-endian id, so tree
/// iteration order is id order. The id counter lives in a separate tree and
/// is bumped atomically, which keeps ids unique when several node loops share
/// one store.
pub struct SledTaskStore {
    db: sled::Db,
    tasks: sled::Tree,
    meta: sled::Tree,
    path: PathBuf,
}

impl SledTaskStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        let db = sled::open(&path)?;
        let tasks = db.open_tree(TASKS_TREE)?;
        let meta = db.open_tree(META_TREE)?;

        log::info!("Sled task store opened at {:?}", path);

        Ok(Self {
            db,
            tasks,
            meta,
            path,
        })
    }

    fn key(id: TaskId) -> [u8; 8] {
        id.to_be_bytes()
    }

    fn decode_id(bytes: &[u8]) -> Option<TaskId> {
        <[u8; 8]>::try_from(bytes).ok().map(u64::from_be_bytes)
    }

    fn encode(task: &Task) -> Result<Vec<u8>, StorageError> {
        bincode::encode_to_vec(task, bincode::config::standard())
            .map_err(|e| StorageError::CodecError(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Task, StorageError> {
        let (task, _): (Task, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| StorageError::CodecError(e.to_string()))?;
        Ok(task)
    }

    fn next_id(&self) -> Result<TaskId, StorageError> {
        let bumped = self.meta.update_and_fetch(NEXT_ID_KEY, |old| {
            let current = old.and_then(Self::decode_id).unwrap_or(0);
            Some((current + 1).to_be_bytes().to_vec())
        })?;

        bumped
            .as_deref()
            .and_then(Self::decode_id)
            .ok_or_else(|| StorageError::CodecError("corrupt id counter".to_string()))
    }

    async fn flush(&self) -> Result<(), StorageError> {
        // Flushes the counter tree along with the rows.
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for SledTaskStore {
    async fn create(&self, description: &str, status: &str) -> Result<TaskId, StorageError> {
        let id = self.next_id()?;
        let task = Task::new(id, description, status);
        self.tasks.insert(Self::key(id), Self::encode(&task)?)?;
        self.flush().await?;

        log::debug!("Inserted task {} into {:?}", id, self.path);
        Ok(id)
    }

    async fn read(&self, id: TaskId) -> Result<Task, StorageError> {
        match self.tasks.get(Self::key(id))? {
            Some(bytes) => Self::decode(&bytes),
            None => Err(StorageError::NotFound(id)),
        }
    }

    async fn update(&self, task: &Task) -> Result<(), StorageError> {
        let key = Self::key(task.id);
        if !self.tasks.contains_key(key)? {
            return Err(StorageError::NotFound(task.id));
        }

        self.tasks.insert(key, Self::encode(task)?)?;
        self.flush().await
    }

    async fn delete(&self, id: TaskId) -> Result<(), StorageError> {
        if self.tasks.remove(Self::key(id))?.is_none() {
            return Err(StorageError::NotFound(id));
        }
        self.flush().await
    }

    async fn list(&self) -> Result<Vec<Task>, StorageError> {
        let mut tasks = Vec::new();
        for item in self.tasks.iter() {
            let (_key, value) = item?;
            tasks.push(Self::decode(&value)?);
        }
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn crud_round_trip_on_disk() {
        let tmp = tempdir().expect("tempdir");
        let store = SledTaskStore::open(tmp.path()).expect("open");

        let id = store.create("Task 11", "Pending").await.expect("create");
        assert_eq!(id, 1);
        assert_eq!(
            store.read(id).await.expect("read"),
            Task::new(1, "Task 11", "Pending")
        );

        store
            .update(&Task::new(id, "Task 11", "Completed"))
            .await
            .expect("update");
        assert_eq!(store.read(id).await.expect("read").status, "Completed");

        store.delete(id).await.expect("delete");
        assert!(matches!(
            store.read(id).await,
            Err(StorageError::NotFound(1))
        ));
    }

    #[tokio::test]
    async fn rows_and_counter_survive_reopen() {
        let tmp = tempdir().expect("tempdir");

        {
            let store = SledTaskStore::open(tmp.path()).expect("open");
            store.create("a", "Pending").await.expect("create a");
            store.create("b", "Pending").await.expect("create b");
        }

        let store = SledTaskStore::open(tmp.path()).expect("reopen");
        let all = store.list().await.expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].description, "a");
        assert_eq!(all[1].description, "b");

        // The counter continues instead of reusing ids.
        let next = store.create("c", "Pending").await.expect("create c");
        assert_eq!(next, 3);
    }

    #[tokio::test]
    async fn update_and_delete_of_missing_rows_fail() {
        let tmp = tempdir().expect("tempdir");
        let store = SledTaskStore::open(tmp.path()).expect("open");

        assert!(matches!(
            store.update(&Task::new(42, "x", "y")).await,
            Err(StorageError::NotFound(42))
        ));
        assert!(matches!(
            store.delete(42).await,
            Err(StorageError::NotFound(42))
        ));
        assert!(store.list().await.expect("list").is_empty());
    }
}
