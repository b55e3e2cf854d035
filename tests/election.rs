use std::time::Duration;

use taskraft::raft::{
    Cluster, ElectionOutcome, Envelope, Liveness, Message, Mutation, NodeRole, RaftConfig, Term,
    VoteReply,
};

fn config(size: usize) -> RaftConfig {
    // Long vote timeout so slow CI machines still see every reply; short
    // settle delay so re-elections don't stall the suite.
    RaftConfig::new(size).with_timings(1_000, 10)
}

/// Wait until every live node has processed the vote requests for `term`.
/// The tally stops at a majority, so slower voters may still be catching up.
async fn wait_for_term(cluster: &Cluster, term: Term) {
    for _ in 0..200 {
        let settled = cluster
            .snapshot()
            .nodes
            .iter()
            .filter(|n| n.liveness == Liveness::Alive)
            .all(|n| n.term >= term);
        if settled {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("nodes did not reach term {term}");
}

fn leaders(cluster: &Cluster) -> usize {
    cluster
        .snapshot()
        .nodes
        .iter()
        .filter(|n| n.role == NodeRole::Leader)
        .count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lone_candidate_wins_with_self_vote_and_two_grants() {
    let cluster = Cluster::in_memory(config(4)).expect("cluster");

    let report = cluster.elect_leader(1).await.expect("elect");

    assert_eq!(report.outcome, ElectionOutcome::Elected);
    assert_eq!(report.term, 1);
    assert_eq!(report.threshold, 3);
    assert_eq!(report.votes, 3);
    assert_eq!(report.contacted, vec![0, 2, 3]);
    // Every peer answered before the round closed; the third grant is not counted.
    assert_eq!(report.answered, 3);
    assert_eq!(report.elected(), Some(1));

    let snapshot = cluster.snapshot();
    assert_eq!(snapshot.leader, Some(1));
    assert_eq!(snapshot.nodes[1].vote_count, 3);
    for node in &snapshot.nodes {
        if node.id != 1 {
            assert_eq!(node.role, NodeRole::Follower);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_node_is_never_asked_for_a_vote() {
    let cluster = Cluster::in_memory(config(4)).expect("cluster");
    assert!(cluster.mark_failed(0).await.expect("fail 0").is_none());

    let report = cluster.elect_leader(1).await.expect("elect");

    assert_eq!(report.contacted, vec![2, 3]);
    assert_eq!(report.votes, 3);
    assert_eq!(report.outcome, ElectionOutcome::Elected);

    let node0 = cluster.node(0).expect("node 0").snapshot();
    assert_eq!(node0.term, 0);
    assert_eq!(node0.liveness, Liveness::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_node_never_starts_an_election() {
    let cluster = Cluster::in_memory(config(4)).expect("cluster");
    cluster.mark_failed(2).await.expect("fail 2");

    let report = cluster.elect_leader(2).await.expect("elect");

    assert_eq!(report.outcome, ElectionOutcome::Ineligible);
    assert!(report.contacted.is_empty());
    assert_eq!(report.votes, 0);
    assert_eq!(cluster.leader(), None);
    for node in cluster.snapshot().nodes {
        assert_eq!(node.term, 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn leader_without_majority_demotes_itself_and_hands_over() {
    let cluster = Cluster::in_memory(config(4)).expect("cluster");
    assert_eq!(
        cluster.elect_leader(1).await.expect("elect").outcome,
        ElectionOutcome::Elected
    );

    cluster.mark_failed(0).await.expect("fail 0");
    cluster.mark_failed(2).await.expect("fail 2");

    // Forced re-check by the sitting leader: only node 3 can answer.
    let report = cluster.elect_leader(1).await.expect("re-check");

    assert_eq!(report.contacted, vec![3]);
    assert_eq!(report.votes, 2);
    assert_eq!(report.threshold, 3);

    let reelection = match &report.outcome {
        ElectionOutcome::Demoted {
            reelection: Some(reelection),
        } => reelection,
        other => panic!("expected demotion with re-election, got {other:?}"),
    };
    assert_eq!(reelection.candidate, 3);
    assert!(reelection.contacted.is_empty());
    assert_eq!(reelection.votes, 1);
    assert_eq!(reelection.outcome, ElectionOutcome::Lost);

    let node1 = cluster.node(1).expect("node 1").snapshot();
    assert_eq!(node1.liveness, Liveness::Failed);
    assert_eq!(node1.role, NodeRole::Follower);
    assert_eq!(cluster.leader(), None);
    assert_eq!(report.elected(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_the_leader_elects_the_next_live_node() {
    let cluster = Cluster::in_memory(config(4)).expect("cluster");
    cluster.elect_leader(1).await.expect("elect");
    wait_for_term(&cluster, 1).await;

    let report = cluster
        .mark_failed(1)
        .await
        .expect("fail leader")
        .expect("re-election ran");

    assert_eq!(report.candidate, 2);
    assert_eq!(report.term, 2);
    assert_eq!(report.contacted, vec![0, 3]);
    assert_eq!(report.outcome, ElectionOutcome::Elected);
    assert_eq!(cluster.leader(), Some(2));
    assert_eq!(cluster.node(1).expect("node 1").role(), NodeRole::Follower);
    assert_eq!(leaders(&cluster), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn successor_search_wraps_around_and_skips_failed_nodes() {
    let cluster = Cluster::in_memory(config(5)).expect("cluster");
    cluster.mark_failed(0).await.expect("fail 0");
    cluster.elect_leader(3).await.expect("elect");
    cluster.mark_failed(4).await.expect("fail 4");

    let report = cluster
        .mark_failed(3)
        .await
        .expect("fail leader")
        .expect("re-election ran");

    // After 3 come 4 and 0 (both failed), then 1.
    assert_eq!(report.candidate, 1);
    assert_eq!(report.contacted, vec![2]);
    // Two live nodes out of five cannot reach the threshold of three.
    assert_eq!(report.outcome, ElectionOutcome::Lost);
    assert_eq!(cluster.leader(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cluster_stays_leaderless_when_nobody_is_alive() {
    let cluster = Cluster::in_memory(config(2)).expect("cluster");
    let report = cluster.elect_leader(0).await.expect("elect");
    assert_eq!(report.threshold, 2);
    assert_eq!(report.outcome, ElectionOutcome::Elected);

    cluster.mark_failed(1).await.expect("fail follower");
    let reelection = cluster.mark_failed(0).await.expect("fail leader");

    assert!(reelection.is_none());
    assert_eq!(cluster.leader(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_node_cluster_elects_itself_without_waiting() {
    let cluster = Cluster::in_memory(config(1)).expect("cluster");

    let report = cluster.elect_leader(0).await.expect("elect");

    assert_eq!(report.threshold, 1);
    assert_eq!(report.votes, 1);
    assert!(report.contacted.is_empty());
    assert_eq!(report.outcome, ElectionOutcome::Elected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn healthy_leader_survives_a_forced_recheck() {
    let cluster = Cluster::in_memory(config(4)).expect("cluster");
    cluster.elect_leader(1).await.expect("elect");

    let report = cluster.elect_leader(1).await.expect("re-check");

    assert_eq!(report.term, 2);
    assert_eq!(report.outcome, ElectionOutcome::Elected);
    assert_eq!(cluster.leader(), Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lagging_old_leader_is_demoted_before_the_round_ends() {
    let cluster = Cluster::in_memory(config(4)).expect("cluster");
    cluster.elect_leader(0).await.expect("elect 0");

    // Bury the old leader's mailbox so its vote arrives well after the majority.
    let old = cluster.node(0).expect("node 0");
    for _ in 0..10_000 {
        old.mailbox()
            .deliver(Envelope::new(1, Message::ReadTask(999)))
            .expect("deliver");
    }

    let report = cluster.elect_leader(3).await.expect("elect 3");

    assert_eq!(report.term, 2);
    assert_eq!(report.outcome, ElectionOutcome::Elected);
    assert_eq!(report.contacted, vec![0, 1, 2]);
    assert_eq!(report.answered, 3);
    assert_eq!(report.votes, 3);
    assert_eq!(old.role(), NodeRole::Follower);
    assert_eq!(leaders(&cluster), 1);
    assert_eq!(cluster.leader(), Some(3));
    assert_eq!(
        cluster
            .submit(Mutation::create("X", "Pending"))
            .expect("submit"),
        3
    );
}

#[tokio::test]
async fn late_grant_from_an_earlier_term_does_not_cost_the_leader_its_seat() {
    let cluster = Cluster::in_memory(config(4)).expect("cluster");
    cluster.mark_failed(0).await.expect("fail 0");
    assert_eq!(
        cluster.elect_leader(1).await.expect("elect").outcome,
        ElectionOutcome::Elected
    );

    // On a current-thread runtime node 1 handles this term-1 grant while its
    // term-2 ballot is open, ahead of the real replies.
    cluster
        .node(1)
        .expect("node 1")
        .mailbox()
        .deliver(Envelope::new(
            3,
            Message::RequestVoteReply(VoteReply {
                term: 1,
                granted: true,
            }),
        ))
        .expect("deliver");

    let report = cluster.elect_leader(1).await.expect("re-check");

    assert_eq!(report.term, 2);
    assert_eq!(report.contacted, vec![2, 3]);
    assert_eq!(report.answered, 2);
    assert_eq!(report.votes, 3);
    assert_eq!(report.outcome, ElectionOutcome::Elected);
    assert_eq!(cluster.leader(), Some(1));
    assert_eq!(
        cluster.node(1).expect("node 1").snapshot().liveness,
        Liveness::Alive
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_candidates_never_both_win() {
    for _ in 0..20 {
        let cluster = Cluster::in_memory(config(4)).expect("cluster");

        let (a, b) = tokio::join!(cluster.elect_leader(1), cluster.elect_leader(2));
        let a = a.expect("elect 1");
        let b = b.expect("elect 2");

        let winners: Vec<_> = [&a, &b]
            .iter()
            .filter(|r| r.outcome == ElectionOutcome::Elected)
            .map(|r| r.candidate)
            .collect();
        assert!(winners.len() <= 1, "both candidates won: {a:?} {b:?}");
        assert_eq!(cluster.leader(), winners.first().copied());
        assert_eq!(leaders(&cluster), winners.len());
    }
}
