use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;

use super::message::{Envelope, Message, Mutation};
use super::node::{Members, RaftNode};
use super::state::NodeSnapshot;
use super::{ElectionReport, NodeId, RaftConfig, RaftError};
use crate::storage::{
    create_task_store, MemoryTaskStore, StorageConfig, StorageError, TaskId, TaskStore,
};

/// Fixed-membership cluster. Owns every node and the task draining each
/// node's mailbox, and is the only way to reach peers: elections, failure
/// injection and client requests all go through it.
pub struct Cluster {
    config: RaftConfig,
    members: Members,
    loops: Vec<JoinHandle<()>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterSnapshot {
    pub leader: Option<NodeId>,
    pub nodes: Vec<NodeSnapshot>,
}

impl Cluster {
    /// Build `config.cluster_size` nodes, asking `store_for` for each node's
    /// store, and spawn their mailbox loops. Must run inside a tokio runtime.
    pub fn start<F>(config: RaftConfig, mut store_for: F) -> Result<Self, RaftError>
    where
        F: FnMut(NodeId) -> Result<Arc<dyn TaskStore>, StorageError>,
    {
        if config.cluster_size == 0 {
            return Err(RaftError::EmptyCluster);
        }

        let mut nodes = Vec::with_capacity(config.cluster_size);
        let mut receivers = Vec::with_capacity(config.cluster_size);
        for id in 0..config.cluster_size {
            let (node, rx) = RaftNode::new(id, store_for(id)?);
            nodes.push(Arc::new(node));
            receivers.push(rx);
        }
        let members: Members = nodes.into();

        let loops = members
            .iter()
            .zip(receivers)
            .map(|(node, rx)| tokio::spawn(Arc::clone(node).run(Arc::clone(&members), rx)))
            .collect();

        info!("Started cluster of {} nodes", config.cluster_size);

        Ok(Self {
            config,
            members,
            loops,
        })
    }

    /// Every node gets its own store built from `storage`.
    pub fn with_storage(config: RaftConfig, storage: &StorageConfig) -> Result<Self, RaftError> {
        Self::start(config, |id| create_task_store(storage, id))
    }

    pub fn in_memory(config: RaftConfig) -> Result<Self, RaftError> {
        Self::start(config, |_| Ok(Arc::new(MemoryTaskStore::new()) as Arc<dyn TaskStore>))
    }

    pub fn config(&self) -> &RaftConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn nodes(&self) -> &[Arc<RaftNode>] {
        &self.members
    }

    pub fn node(&self, id: NodeId) -> Result<&Arc<RaftNode>, RaftError> {
        self.members.get(id).ok_or(RaftError::UnknownNode(id))
    }

    pub fn store(&self, id: NodeId) -> Result<Arc<dyn TaskStore>, RaftError> {
        Ok(self.node(id)?.store())
    }

    /// The live node holding the leader role, if any. Should a round end on
    /// the vote timeout before an old leader heard the new term, the leader
    /// with the newest term wins.
    pub fn leader(&self) -> Option<NodeId> {
        self.members
            .iter()
            .filter_map(|node| {
                let state = node.state();
                (state.is_alive() && state.is_leader()).then_some((state.term, node.id()))
            })
            .max_by_key(|&(term, _)| term)
            .map(|(_, id)| id)
    }

    /// Failure injection: mark node `id` as failed. If it was the live
    /// leader, a re-election runs before this returns and its report is
    /// handed back.
    pub async fn mark_failed(&self, id: NodeId) -> Result<Option<ElectionReport>, RaftError> {
        let was_leader = self.node(id)?.state().fail();
        warn!("Node {} marked as failed", id);

        if was_leader {
            info!("Leader {} failed, triggering re-election", id);
            self.reelect(id).await
        } else {
            Ok(None)
        }
    }

    /// Hand a mutation to the current leader. The leader applies it and then
    /// forwards it to the live followers. Returns the leader's id.
    pub fn submit(&self, mutation: Mutation) -> Result<NodeId, RaftError> {
        let leader = self.leader().ok_or(RaftError::NoLeader)?;
        self.members[leader]
            .mailbox()
            .deliver(Envelope::new(leader, mutation.into()))?;
        Ok(leader)
    }

    /// Ask `target` to read task `id` and reply to `requester`, whose
    /// `last_read` picks up the result.
    pub fn request_read(
        &self,
        requester: NodeId,
        target: NodeId,
        id: TaskId,
    ) -> Result<(), RaftError> {
        self.node(requester)?;
        self.node(target)?
            .mailbox()
            .deliver(Envelope::new(requester, Message::ReadTask(id)))
    }

    /// Stop every node loop and wait until each one is gone. Stores are
    /// released once the returned future completes.
    pub async fn shutdown(mut self) {
        for handle in std::mem::take(&mut self.loops) {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Node loop ended abnormally: {}", e);
                }
            }
        }
        info!("Cluster of {} nodes shut down", self.members.len());
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        ClusterSnapshot {
            leader: self.leader(),
            nodes: self.members.iter().map(|node| node.snapshot()).collect(),
        }
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        for handle in &self.loops {
            handle.abort();
        }
    }
}
