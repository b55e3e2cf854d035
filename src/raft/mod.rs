mod cluster;
mod config;
mod election;
mod error;
mod mailbox;
mod message;
mod node;
mod replication;
mod state;

pub use self::cluster::{Cluster, ClusterSnapshot};
pub use self::config::{majority, RaftConfig};
pub use self::election::{ElectionOutcome, ElectionReport};
pub use self::error::RaftError;
pub use self::mailbox::Mailbox;
pub use self::message::{Envelope, Message, Mutation, VoteReply, VoteRequest};
pub use self::node::{Members, RaftNode};
pub use self::replication::fan_out;
pub use self::state::{Ballot, Liveness, NodeRole, NodeSnapshot, NodeState};

/// Index of a node in the cluster, `0..cluster_size`.
pub type NodeId = usize;

/// Election epoch. Higher terms supersede lower ones.
pub type Term = u64;
