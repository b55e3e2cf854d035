use thiserror::Error;

use super::TaskId;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Sled error: {0}")]
    SledError(String),

    #[error("Codec error: {0}")]
    CodecError(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::SledError(err.to_string())
    }
}
