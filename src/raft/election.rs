//! Candidate side of an election and the re-election trigger.
//!
//! A candidate opens a ballot, asks every live peer for a vote and then waits
//! on the ballot channel until every contacted peer has answered. A closed
//! ballot (newer term) or the vote timeout cut the wait short. Grants past the
//! majority are acknowledged but not counted.
//!
//! Waiting for every answer means each voter has already adopted the new term
//! and stepped down when the round ends, so a previous leader cannot outlive a
//! completed round.

use std::future::Future;
use std::pin::Pin;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use super::cluster::Cluster;
use super::message::{Envelope, Message, VoteReply, VoteRequest};
use super::node::RaftNode;
use super::state::NodeRole;
use super::{NodeId, RaftError, Term};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ElectionOutcome {
    /// Majority reached; the candidate is now leader.
    Elected,
    /// Short of a majority; the candidate went back to follower.
    Lost,
    /// The candidate is failed and did not run.
    Ineligible,
    /// The candidacy was ended from outside during the wait, by a newer
    /// term or by failure injection.
    Interrupted { term: Term },
    /// A sitting leader could not secure a majority and marked itself
    /// failed. Holds the report of the re-election it triggered, if any node
    /// was left to run one.
    Demoted {
        reelection: Option<Box<ElectionReport>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElectionReport {
    pub candidate: NodeId,
    pub term: Term,
    pub votes: usize,
    pub threshold: usize,
    /// Peers the vote request was sent to.
    pub contacted: Vec<NodeId>,
    /// Contacted peers whose reply for this term arrived before the wait ended.
    pub answered: usize,
    pub outcome: ElectionOutcome,
}

impl ElectionReport {
    /// Leader installed by this round or by the re-election it triggered.
    pub fn elected(&self) -> Option<NodeId> {
        match &self.outcome {
            ElectionOutcome::Elected => Some(self.candidate),
            ElectionOutcome::Demoted {
                reelection: Some(report),
            } => report.elected(),
            _ => None,
        }
    }
}

type ReelectionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<ElectionReport>, RaftError>> + Send + 'a>>;

impl Cluster {
    /// Run one election round with `candidate` as the only candidate.
    pub async fn elect_leader(&self, candidate: NodeId) -> Result<ElectionReport, RaftError> {
        let node = self.node(candidate)?;
        let threshold = self.config().majority();

        let (term, was_leader, mut replies) = {
            let mut state = node.state();
            if !state.is_alive() {
                info!("Node {} is failed, not starting an election", candidate);
                return Ok(ElectionReport {
                    candidate,
                    term: state.term,
                    votes: 0,
                    threshold,
                    contacted: Vec::new(),
                    answered: 0,
                    outcome: ElectionOutcome::Ineligible,
                });
            }
            state.open_ballot()
        };

        info!("Node {} starting election for term {}", candidate, term);
        let contacted = self.request_votes(candidate, term);

        let (votes, answered) = self
            .tally(node, term, threshold, contacted.len(), &mut replies)
            .await;
        info!(
            "Node {} received {} of {} required votes for term {} ({}/{} peers answered)",
            candidate,
            votes,
            threshold,
            term,
            answered,
            contacted.len()
        );

        let mut outcome = {
            let mut state = node.state();
            if state.ballot.as_ref().is_some_and(|b| b.term == term) {
                state.ballot = None;
            }

            if state.role != NodeRole::Candidate || state.term != term {
                info!(
                    "Node {} candidacy for term {} interrupted (now term {})",
                    candidate, term, state.term
                );
                ElectionOutcome::Interrupted { term: state.term }
            } else if votes >= threshold {
                state.role = NodeRole::Leader;
                info!("Node {} becomes the leader for term {}", candidate, term);
                ElectionOutcome::Elected
            } else if was_leader {
                state.fail();
                warn!(
                    "Leader {} could not secure a majority ({}/{}), marking it failed",
                    candidate, votes, threshold
                );
                ElectionOutcome::Demoted { reelection: None }
            } else {
                state.role = NodeRole::Follower;
                info!("Node {} lost the election for term {}", candidate, term);
                ElectionOutcome::Lost
            }
        };

        if let ElectionOutcome::Demoted { reelection } = &mut outcome {
            *reelection = self.reelect(candidate).await?.map(Box::new);
        }

        Ok(ElectionReport {
            candidate,
            term,
            votes,
            threshold,
            contacted,
            answered,
            outcome,
        })
    }

    /// Send the vote request to every other member alive at send time.
    fn request_votes(&self, candidate: NodeId, term: Term) -> Vec<NodeId> {
        let request = Message::RequestVote(VoteRequest {
            term,
            candidate_id: candidate,
        });

        let mut contacted = Vec::new();
        for peer in self.nodes().iter().filter(|p| p.id() != candidate) {
            if !peer.is_alive() {
                debug!("Node {} skipping failed node {}", candidate, peer.id());
                continue;
            }

            debug!("Node {} sending vote request to node {}", candidate, peer.id());
            match peer
                .mailbox()
                .deliver(Envelope::new(candidate, request.clone()))
            {
                Ok(()) => contacted.push(peer.id()),
                Err(e) => warn!("Node {} could not request a vote: {}", candidate, e),
            }
        }
        contacted
    }

    /// Collect replies for `term` until every contacted peer has answered, the
    /// ballot closes or the vote timeout fires. Returns the counted votes (own
    /// vote included, capped at the threshold) and the number of answers.
    async fn tally(
        &self,
        node: &RaftNode,
        term: Term,
        threshold: usize,
        expected: usize,
        replies: &mut mpsc::UnboundedReceiver<(NodeId, VoteReply)>,
    ) -> (usize, usize) {
        let mut votes = node.state().vote_count;
        let mut answered = 0;

        let wait = async {
            while answered < expected {
                let Some((voter, reply)) = replies.recv().await else {
                    break;
                };
                if reply.term != term {
                    debug!("Ignoring term {} reply from node {}", reply.term, voter);
                    continue;
                }
                answered += 1;

                if !reply.granted {
                    debug!("Node {} refused to vote for term {}", voter, term);
                    continue;
                }
                if votes >= threshold {
                    debug!("Node {} granted vote for term {} after majority", voter, term);
                    continue;
                }

                match node.state().record_grant(term) {
                    Some(total) => {
                        debug!("Node {} granted vote for term {} ({} total)", voter, term, total);
                        votes = total;
                    }
                    None => break,
                }
            }
        };

        if timeout(self.config().vote_timeout(), wait).await.is_err() {
            debug!(
                "Vote collection for term {} timed out after {:?} ({}/{} answered)",
                term,
                self.config().vote_timeout(),
                answered,
                expected
            );
        }

        (votes, answered)
    }

    /// After the settle delay, have the next live node after `failed` (in
    /// cluster order, wrapping) run an election. `Ok(None)` means nobody is
    /// left alive and the cluster stays leaderless.
    pub(crate) fn reelect(&self, failed: NodeId) -> ReelectionFuture<'_> {
        Box::pin(async move {
            sleep(self.config().settle_delay()).await;
            info!("Re-electing leader after node {} failed", failed);

            let size = self.len();
            let next = (1..size)
                .map(|offset| (failed + offset) % size)
                .find(|&id| self.nodes()[id].is_alive());

            match next {
                Some(id) => {
                    info!("Initiating leader election from node {}", id);
                    self.elect_leader(id).await.map(Some)
                }
                None => {
                    warn!("No live nodes remain, cluster is leaderless");
                    Ok(None)
                }
            }
        })
    }
}
