use std::fs::OpenOptions;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use rand::seq::IndexedRandom;
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use taskraft::raft::{ClusterSnapshot, NodeId};
use taskraft::{Cluster, Config, ElectionReport, Mutation, StorageConfig, Task};

fn init_logging() {
    if let Ok(path) = std::env::var("TASKRAFT_LOG_FILE") {
        // Plain env_logger output to a file instead of structured stderr logs.
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {path}: {e}, logging to stderr"),
        }
        builder.init();
        return;
    }

    let _ = LogTracer::init();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_target(true);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

#[derive(Parser)]
#[command(name = "taskraft")]
#[command(about = "In-process leader election with task replication")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreKind {
    Memory,
    Sled,
}

#[derive(Subcommand)]
enum Command {
    /// Run the failover scenario: fail a node, elect, replicate, fail the leader
    Simulate {
        /// JSON config file; flags below override it
        #[arg(short, long)]
        config: Option<String>,

        /// Number of nodes in the cluster
        #[arg(short, long)]
        nodes: Option<usize>,

        /// Task storage backend
        #[arg(long, value_enum)]
        store: Option<StoreKind>,

        /// Directory for sled stores (one sub-directory per node)
        #[arg(short, long, default_value = "data")]
        data_dir: String,

        /// Upper bound on waiting for vote replies
        #[arg(long)]
        vote_timeout_ms: Option<u64>,

        /// Pause before a re-election starts
        #[arg(long)]
        settle_delay_ms: Option<u64>,

        /// Pick the first candidate at random among live nodes
        #[arg(long)]
        random_candidate: bool,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as JSON
    ShowConfig {
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[derive(Serialize)]
struct SimulationReport {
    first_election: ElectionReport,
    reelection: Option<ElectionReport>,
    cluster: ClusterSnapshot,
    tasks: Vec<NodeTasks>,
}

#[derive(Serialize)]
struct NodeTasks {
    node: NodeId,
    tasks: Vec<Task>,
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Ok(Config::default()),
    }
}

/// Poll until every live node holds `expected` tasks, or give up at the
/// deadline. Replication is fire-and-forget, so this is the only way to know
/// the followers caught up.
async fn wait_for_replication(cluster: &Cluster, expected: usize, deadline: Duration) -> bool {
    let started = Instant::now();
    loop {
        let mut caught_up = true;
        for node in cluster.nodes().iter().filter(|n| n.is_alive()) {
            match node.store().list().await {
                Ok(tasks) if tasks.len() == expected => {}
                _ => caught_up = false,
            }
        }
        if caught_up {
            return true;
        }
        if started.elapsed() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(20)).await;
    }
}

fn first_candidate(cluster: &Cluster, random: bool) -> Option<NodeId> {
    let alive: Vec<NodeId> = cluster
        .nodes()
        .iter()
        .filter(|n| n.is_alive())
        .map(|n| n.id())
        .collect();

    if random {
        alive.choose(&mut rand::rng()).copied()
    } else {
        alive.first().copied()
    }
}

#[allow(clippy::too_many_arguments)]
async fn simulate(
    config: Option<String>,
    nodes: Option<usize>,
    store: Option<StoreKind>,
    data_dir: String,
    vote_timeout_ms: Option<u64>,
    settle_delay_ms: Option<u64>,
    random_candidate: bool,
    json: bool,
) -> Result<()> {
    let mut cfg = load_config(config.as_deref())?;
    if let Some(n) = nodes {
        cfg.raft.cluster_size = n;
    }
    if let Some(ms) = vote_timeout_ms {
        cfg.raft.vote_timeout_ms = ms;
    }
    if let Some(ms) = settle_delay_ms {
        cfg.raft.settle_delay_ms = ms;
    }
    match store {
        Some(StoreKind::Memory) => cfg.storage = StorageConfig::Memory,
        Some(StoreKind::Sled) => cfg.storage = StorageConfig::Sled { data_dir },
        None => {}
    }

    info!(
        "Starting {} nodes with {:?} storage",
        cfg.raft.cluster_size, cfg.storage
    );
    let cluster = Cluster::with_storage(cfg.raft.clone(), &cfg.storage)
        .context("starting cluster")?;

    // Node 0 goes down before anyone campaigns.
    if cluster.len() > 1 {
        cluster.mark_failed(0).await?;
    }

    let candidate = first_candidate(&cluster, random_candidate)
        .context("no live node to start an election")?;
    info!("Initiating leader election from node {candidate}");
    let first_election = cluster.elect_leader(candidate).await?;

    let mut reelection = None;
    match cluster.leader() {
        Some(leader) => {
            for seed in &cfg.seed_tasks {
                cluster.submit(Mutation::create(&seed.description, &seed.status))?;
            }
            if !wait_for_replication(&cluster, cfg.seed_tasks.len(), Duration::from_secs(3)).await
            {
                warn!("Followers did not catch up with leader {leader} in time");
            }

            // Take the leader down and let the cluster pick a successor.
            reelection = cluster.mark_failed(leader).await?;
        }
        None => warn!("No leader after the first election, skipping replication"),
    }

    let mut tasks = Vec::new();
    for node in cluster.nodes() {
        tasks.push(NodeTasks {
            node: node.id(),
            tasks: node.store().list().await?,
        });
    }

    let report = SimulationReport {
        first_election,
        reelection,
        cluster: cluster.snapshot(),
        tasks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    cluster.shutdown().await;
    Ok(())
}

fn print_report(report: &SimulationReport) {
    let first = &report.first_election;
    println!(
        "First election: node {} term {} votes {}/{} contacted {:?} answered {} -> {:?}",
        first.candidate,
        first.term,
        first.votes,
        first.threshold,
        first.contacted,
        first.answered,
        first.outcome
    );
    match &report.reelection {
        Some(r) => println!(
            "Re-election: node {} term {} votes {}/{} contacted {:?} -> {:?}",
            r.candidate, r.term, r.votes, r.threshold, r.contacted, r.outcome
        ),
        None => println!("Re-election: none"),
    }

    match report.cluster.leader {
        Some(id) => println!("Current leader: node {id}"),
        None => println!("Current leader: none"),
    }
    for node in &report.cluster.nodes {
        println!(
            "  node {}: term {} {:?} {:?} votes {}",
            node.id, node.term, node.role, node.liveness, node.vote_count
        );
    }

    for entry in &report.tasks {
        println!("Tasks on node {}:", entry.node);
        for task in &entry.tasks {
            println!("  #{} {} [{}]", task.id, task.description, task.status);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Simulate {
            config,
            nodes,
            store,
            data_dir,
            vote_timeout_ms,
            settle_delay_ms,
            random_candidate,
            json,
        } => {
            simulate(
                config,
                nodes,
                store,
                data_dir,
                vote_timeout_ms,
                settle_delay_ms,
                random_candidate,
                json,
            )
            .await?;
        }
        Command::ShowConfig { config } => {
            let cfg = load_config(config.as_deref())?;
            println!("{}", cfg.to_json()?);
        }
    }

    Ok(())
}
