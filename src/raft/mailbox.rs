use tokio::sync::mpsc;

use super::message::Envelope;
use super::{NodeId, RaftError};

/// Sending half of a node's inbound queue. Unbounded, so delivery never
/// waits on the receiver; ordering is FIFO per sender.
#[derive(Debug, Clone)]
pub struct Mailbox {
    owner: NodeId,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Mailbox {
    pub fn new(owner: NodeId) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { owner, tx }, rx)
    }

    pub fn owner(&self) -> NodeId {
        self.owner
    }

    pub fn deliver(&self, envelope: Envelope) -> Result<(), RaftError> {
        self.tx
            .send(envelope)
            .map_err(|_| RaftError::MailboxClosed(self.owner))
    }
}
