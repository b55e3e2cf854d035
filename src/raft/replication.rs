use std::sync::Arc;

use log::warn;

use super::message::{Envelope, Message};
use super::node::RaftNode;
use super::NodeId;

/// Push an already-applied mutation from `leader` to every other member that
/// is alive right now. Fire-and-forget: nothing is acknowledged or retried.
///
/// Returns the ids whose mailboxes accepted the copy.
pub fn fan_out(members: &[Arc<RaftNode>], leader: NodeId, message: &Message) -> Vec<NodeId> {
    members
        .iter()
        .filter(|peer| peer.id() != leader && peer.is_alive())
        .filter_map(|peer| {
            match peer
                .mailbox()
                .deliver(Envelope::new(leader, message.clone()))
            {
                Ok(()) => Some(peer.id()),
                Err(e) => {
                    warn!("Leader {} could not forward {}: {}", leader, message.kind(), e);
                    None
                }
            }
        })
        .collect()
}
