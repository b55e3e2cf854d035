use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info};
use tokio::sync::mpsc;

use super::mailbox::Mailbox;
use super::message::{Envelope, Message, Mutation, VoteReply, VoteRequest};
use super::replication::fan_out;
use super::state::{NodeRole, NodeSnapshot, NodeState};
use super::{NodeId, RaftError};
use crate::storage::{Task, TaskId, TaskStore};

/// Fixed, ordered cluster membership. Index `i` holds node `i`.
pub type Members = Arc<[Arc<RaftNode>]>;

pub struct RaftNode {
    // Node identity
    id: NodeId,

    // Term, role, liveness, open ballot
    state: Mutex<NodeState>,

    // Communication
    mailbox: Mailbox,

    // Local task storage
    store: Arc<dyn TaskStore>,
}

impl RaftNode {
    pub fn new(id: NodeId, store: Arc<dyn TaskStore>) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (mailbox, rx) = Mailbox::new(id);
        let node = Self {
            id,
            state: Mutex::new(NodeState::default()),
            mailbox,
            store,
        };
        (node, rx)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        Arc::clone(&self.store)
    }

    /// Lock the node's state. Never hold the guard across an `.await`.
    pub(crate) fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_alive(&self) -> bool {
        self.state().is_alive()
    }

    pub fn role(&self) -> NodeRole {
        self.state().role
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        self.state().snapshot(self.id)
    }

    /// Most recent task delivered to this node by a `ReadTaskReply`.
    pub fn last_read(&self) -> Option<Task> {
        self.state().last_read.clone()
    }

    /// Drain the mailbox for as long as the process lives. Errors from a
    /// single message are logged and never stop the loop.
    pub async fn run(self: Arc<Self>, members: Members, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(envelope) = rx.recv().await {
            let kind = envelope.message.kind();
            let sender = envelope.sender_id;
            if let Err(e) = self.handle_message(&members, envelope).await {
                error!(
                    "Node {} failed to handle {} from node {}: {}",
                    self.id, kind, sender, e
                );
            }
        }
        debug!("Node {} mailbox closed", self.id);
    }

    pub async fn handle_message(
        &self,
        members: &[Arc<RaftNode>],
        envelope: Envelope,
    ) -> Result<(), RaftError> {
        let Envelope { sender_id, message } = envelope;

        if !self.is_alive() {
            debug!(
                "Node {} is failed, discarding {} from node {}",
                self.id,
                message.kind(),
                sender_id
            );
            return Ok(());
        }

        match message {
            Message::RequestVote(request) => self.handle_request_vote(members, sender_id, request),
            Message::RequestVoteReply(reply) => {
                self.handle_vote_reply(sender_id, reply);
                Ok(())
            }
            Message::ReadTask(id) => self.handle_read(members, sender_id, id).await,
            Message::ReadTaskReply(task) => {
                debug!("Node {} received task {} from node {}", self.id, task.id, sender_id);
                self.state().last_read = Some(task);
                Ok(())
            }
            Message::CreateTask {
                description,
                status,
            } => {
                self.apply_mutation(members, Mutation::Create { description, status })
                    .await
            }
            Message::UpdateTask(task) => self.apply_mutation(members, Mutation::Update(task)).await,
            Message::DeleteTask(id) => self.apply_mutation(members, Mutation::Delete(id)).await,
        }
    }

    fn handle_request_vote(
        &self,
        members: &[Arc<RaftNode>],
        sender_id: NodeId,
        request: VoteRequest,
    ) -> Result<(), RaftError> {
        let candidate = members
            .get(sender_id)
            .ok_or(RaftError::UnknownNode(sender_id))?;

        // Decide, adopt and reply without releasing the lock.
        let mut state = self.state();
        let reply = state.consider_vote(&request);
        debug!(
            "Node {} {} vote for node {} in term {}",
            self.id,
            if reply.granted { "grants" } else { "refuses" },
            request.candidate_id,
            request.term
        );
        candidate
            .mailbox()
            .deliver(Envelope::new(self.id, Message::RequestVoteReply(reply)))
    }

    fn handle_vote_reply(&self, sender_id: NodeId, reply: VoteReply) {
        let mut state = self.state();

        if reply.term > state.term {
            info!(
                "Node {} saw newer term {} from node {}, stepping down",
                self.id, reply.term, sender_id
            );
            state.step_down(reply.term);
            return;
        }

        // Only replies for the ballot's own term count; a late reply from an
        // earlier round must not stand in for a current voter.
        let forwarded = match &state.ballot {
            Some(ballot) if ballot.term == reply.term => {
                ballot.replies.send((sender_id, reply)).is_ok()
            }
            _ => false,
        };
        if !forwarded {
            debug!(
                "Node {} dropping stale vote reply from node {}",
                self.id, sender_id
            );
        }
    }

    async fn handle_read(
        &self,
        members: &[Arc<RaftNode>],
        sender_id: NodeId,
        id: TaskId,
    ) -> Result<(), RaftError> {
        let requester = members
            .get(sender_id)
            .ok_or(RaftError::UnknownNode(sender_id))?;

        let task = self.store.read(id).await?;
        requester
            .mailbox()
            .deliver(Envelope::new(self.id, Message::ReadTaskReply(task)))
    }

    /// Apply a create/update/delete locally. A leader then forwards the very
    /// same message to every live peer; a failed apply is never forwarded.
    async fn apply_mutation(
        &self,
        members: &[Arc<RaftNode>],
        mutation: Mutation,
    ) -> Result<(), RaftError> {
        match &mutation {
            Mutation::Create {
                description,
                status,
            } => {
                let id = self.store.create(description, status).await?;
                debug!("Node {} created task {}", self.id, id);
            }
            Mutation::Update(task) => {
                self.store.update(task).await?;
                debug!("Node {} updated task {}", self.id, task.id);
            }
            Mutation::Delete(id) => {
                self.store.delete(*id).await?;
                debug!("Node {} deleted task {}", self.id, id);
            }
        }

        if self.state().is_leader() {
            let message = Message::from(mutation);
            let recipients = fan_out(members, self.id, &message);
            debug!(
                "Leader {} forwarded {} to nodes {:?}",
                self.id,
                message.kind(),
                recipients
            );
        }

        Ok(())
    }
}
