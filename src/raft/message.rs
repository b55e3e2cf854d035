use serde::{Deserialize, Serialize};

use super::{NodeId, Term};
use crate::storage::{Task, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: Term,
    pub candidate_id: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReply {
    pub term: Term,
    pub granted: bool,
}

/// Everything a node's mailbox can carry. The payload shape is fixed by the
/// variant, so there is nothing to check at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    RequestVote(VoteRequest),
    RequestVoteReply(VoteReply),
    CreateTask { description: String, status: String },
    ReadTask(TaskId),
    UpdateTask(Task),
    DeleteTask(TaskId),
    ReadTaskReply(Task),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::RequestVote(_) => "RequestVote",
            Message::RequestVoteReply(_) => "RequestVoteReply",
            Message::CreateTask { .. } => "CreateTask",
            Message::ReadTask(_) => "ReadTask",
            Message::UpdateTask(_) => "UpdateTask",
            Message::DeleteTask(_) => "DeleteTask",
            Message::ReadTaskReply(_) => "ReadTaskReply",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender_id: NodeId,
    pub message: Message,
}

impl Envelope {
    pub fn new(sender_id: NodeId, message: Message) -> Self {
        Self { sender_id, message }
    }
}

/// State-changing operation a client may hand to the leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    Create { description: String, status: String },
    Update(Task),
    Delete(TaskId),
}

impl Mutation {
    pub fn create(description: impl Into<String>, status: impl Into<String>) -> Self {
        Mutation::Create {
            description: description.into(),
            status: status.into(),
        }
    }
}

impl From<Mutation> for Message {
    fn from(mutation: Mutation) -> Self {
        match mutation {
            Mutation::Create {
                description,
                status,
            } => Message::CreateTask {
                description,
                status,
            },
            Mutation::Update(task) => Message::UpdateTask(task),
            Mutation::Delete(id) => Message::DeleteTask(id),
        }
    }
}
