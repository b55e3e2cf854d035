use thiserror::Error;

use super::NodeId;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum RaftError {
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("No leader elected")]
    NoLeader,

    #[error("Cluster must have at least one node")]
    EmptyCluster,

    #[error("Mailbox of node {0} is closed")]
    MailboxClosed(NodeId),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
