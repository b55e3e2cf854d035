use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::message::{VoteReply, VoteRequest};
use super::{NodeId, Term};
use crate::storage::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Liveness {
    Alive,
    Failed,
}

/// Vote collection channel of an election in progress. Dropping it ends the
/// candidate's tally wait.
#[derive(Debug)]
pub struct Ballot {
    pub term: Term,
    pub replies: mpsc::UnboundedSender<(NodeId, VoteReply)>,
}

/// Mutable per-node state. Only ever touched while holding the node's lock.
#[derive(Debug)]
pub struct NodeState {
    pub term: Term,
    pub role: NodeRole,
    pub liveness: Liveness,
    pub vote_count: usize,
    pub ballot: Option<Ballot>,
    pub last_read: Option<Task>,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            term: 0,
            role: NodeRole::Follower,
            liveness: Liveness::Alive,
            vote_count: 0,
            ballot: None,
            last_read: None,
        }
    }
}

impl NodeState {
    pub fn is_alive(&self) -> bool {
        self.liveness == Liveness::Alive
    }

    pub fn is_leader(&self) -> bool {
        self.role == NodeRole::Leader
    }

    /// Voter rule: grant only for a strictly newer term. Comparing, adopting
    /// and building the reply happen in this one call, so callers holding the
    /// node lock cannot grant twice for the same term.
    pub fn consider_vote(&mut self, request: &VoteRequest) -> VoteReply {
        let granted = request.term > self.term;
        if granted {
            self.step_down(request.term);
        }

        VoteReply {
            term: self.term,
            granted,
        }
    }

    /// Adopt a newer term as a follower. Any open ballot is abandoned.
    pub fn step_down(&mut self, term: Term) {
        self.term = term;
        self.role = NodeRole::Follower;
        self.vote_count = 0;
        self.ballot = None;
    }

    /// Enter candidacy for the next term and open a ballot for it.
    ///
    /// Returns the new term, whether the node was leading before, and the
    /// receiving end of the ballot.
    pub fn open_ballot(&mut self) -> (Term, bool, mpsc::UnboundedReceiver<(NodeId, VoteReply)>) {
        let was_leader = self.is_leader();
        let (tx, rx) = mpsc::unbounded_channel();

        self.term += 1;
        self.role = NodeRole::Candidate;
        self.vote_count = 1;
        self.ballot = Some(Ballot {
            term: self.term,
            replies: tx,
        });

        (self.term, was_leader, rx)
    }

    /// Count one granted vote for `term`. Returns the new total, or `None`
    /// when the node is no longer a candidate in that term.
    pub fn record_grant(&mut self, term: Term) -> Option<usize> {
        if self.role != NodeRole::Candidate || self.term != term {
            return None;
        }
        self.vote_count += 1;
        Some(self.vote_count)
    }

    /// Mark the node unreachable. Returns true if it was the live leader.
    pub fn fail(&mut self) -> bool {
        let was_leading = self.is_alive() && self.is_leader();
        self.liveness = Liveness::Failed;
        self.role = NodeRole::Follower;
        self.ballot = None;
        was_leading
    }

    pub fn snapshot(&self, id: NodeId) -> NodeSnapshot {
        NodeSnapshot {
            id,
            term: self.term,
            role: self.role,
            liveness: self.liveness,
            vote_count: self.vote_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub term: Term,
    pub role: NodeRole,
    pub liveness: Liveness,
    pub vote_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(term: Term) -> VoteRequest {
        VoteRequest {
            term,
            candidate_id: 1,
        }
    }

    #[test]
    fn new_state_is_alive_follower_at_term_zero() {
        let state = NodeState::default();
        assert_eq!(state.term, 0);
        assert_eq!(state.role, NodeRole::Follower);
        assert!(state.is_alive());
        assert_eq!(state.vote_count, 0);
    }

    #[test]
    fn grants_and_adopts_newer_term() {
        let mut state = NodeState::default();
        let reply = state.consider_vote(&request(3));

        assert!(reply.granted);
        assert_eq!(reply.term, 3);
        assert_eq!(state.term, 3);
    }

    #[test]
    fn refuses_same_or_older_term() {
        let mut state = NodeState {
            term: 5,
            ..NodeState::default()
        };

        let same = state.consider_vote(&request(5));
        assert!(!same.granted);
        assert_eq!(same.term, 5);

        let older = state.consider_vote(&request(2));
        assert!(!older.granted);
        assert_eq!(state.term, 5);
    }

    #[test]
    fn second_candidate_in_adopted_term_is_refused() {
        let mut state = NodeState::default();
        assert!(state.consider_vote(&request(1)).granted);

        let rival = VoteRequest {
            term: 1,
            candidate_id: 2,
        };
        assert!(!state.consider_vote(&rival).granted);
    }

    #[test]
    fn granting_demotes_leader_and_drops_ballot() {
        let mut state = NodeState::default();
        let (term, _, mut rx) = state.open_ballot();
        state.role = NodeRole::Leader;

        assert!(state.consider_vote(&request(term + 1)).granted);
        assert_eq!(state.role, NodeRole::Follower);
        assert!(state.ballot.is_none());
        // Sender side is gone, so a waiting tally would wake up.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn open_ballot_counts_self_vote() {
        let mut state = NodeState::default();
        let (term, was_leader, _rx) = state.open_ballot();

        assert_eq!(term, 1);
        assert!(!was_leader);
        assert_eq!(state.role, NodeRole::Candidate);
        assert_eq!(state.vote_count, 1);
        assert_eq!(state.record_grant(1), Some(2));
        assert_eq!(state.record_grant(2), None);
    }

    #[test]
    fn fail_reports_whether_leader_was_lost() {
        let mut leader = NodeState {
            role: NodeRole::Leader,
            ..NodeState::default()
        };
        assert!(leader.fail());
        assert_eq!(leader.liveness, Liveness::Failed);
        assert_eq!(leader.role, NodeRole::Follower);

        // Already failed: nothing new is lost.
        assert!(!leader.fail());

        let mut follower = NodeState::default();
        assert!(!follower.fail());
    }
}
