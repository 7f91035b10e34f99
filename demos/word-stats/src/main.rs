#[macro_use]
extern crate tracing;

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use tallycake::node::{ClusterMember, MembershipEvent, TallycakeNodeBuilder};
use tallycake::stats::{StatsReply, StatsServiceExtension, WordLength};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args: Args = Args::parse();

    let (events_tx, events) = futures::channel::mpsc::unbounded();
    let node = TallycakeNodeBuilder::new(args.node_id, args.public_addr)
        .with_data_center(&args.data_center)
        .start(events);

    // Stand in peers, a real deployment feeds these from its failure detector.
    let mut node_ids = vec![args.node_id];
    for member in peer_members(&args)? {
        node_ids.push(member.node_id);
        events_tx.unbounded_send(MembershipEvent::Joined(member))?;
    }
    node.wait_for_nodes(&node_ids, Duration::from_secs(5)).await?;

    let mut extension = StatsServiceExtension::new(WordLength)
        .with_deadline(Duration::from_millis(args.deadline_ms));
    if args.consistent_hash {
        extension = extension.with_policy(tallycake::node::ConsistentHash);
    }
    if let Some(capacity) = args.cache_capacity {
        extension = extension.with_cache_capacity(capacity);
    }

    let service = node.add_extension(extension).await?;
    let handle = service.handle();
    info!(
        num_workers = service.pool().num_workers(),
        "Reading requests from stdin, one per line."
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match handle.request(&line).await {
            StatsReply::Complete(stat) => println!("mean={:.3} tokens={}", stat.mean, stat.expected),
            StatsReply::Partial(stat) => println!(
                "mean={:.3} tokens={} partial (received={} failed={} missing={})",
                stat.mean,
                stat.expected,
                stat.received,
                stat.failures,
                stat.missing(),
            ),
            StatsReply::Failed(error) => println!("error: {error}"),
        }
    }

    let stats = service.statistics();
    info!(
        num_requests = stats.num_requests(),
        num_complete = stats.num_complete(),
        num_partial = stats.num_partial(),
        num_timeouts = stats.num_timeouts(),
        num_cache_hits = stats.num_cache_hits(),
        num_cache_misses = stats.num_cache_misses(),
        "Input has ended."
    );

    drop(events_tx);
    node.shutdown().await;

    Ok(())
}

/// Builds the in-process peers, numbered and addressed after the node itself.
fn peer_members(args: &Args) -> Result<Vec<ClusterMember>> {
    (1..=args.peers)
        .map(|offset| {
            let node_id = args
                .node_id
                .checked_add(offset)
                .ok_or_else(|| anyhow!("Peer {offset} overflows the node ID {}.", args.node_id))?;
            let port = u16::try_from(offset)
                .ok()
                .and_then(|offset| args.public_addr.port().checked_add(offset))
                .ok_or_else(|| {
                    anyhow!("Peer {offset} overflows the port of {}.", args.public_addr)
                })?;
            let addr = SocketAddr::new(args.public_addr.ip(), port);
            Ok(ClusterMember::new(node_id, addr, args.data_center.as_str()))
        })
        .collect()
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[arg(long, default_value_t = 1)]
    /// The unique ID of the node.
    node_id: u32,

    #[arg(long, default_value = "127.0.0.1:8001")]
    /// The public address of the node.
    public_addr: SocketAddr,

    #[arg(long, default_value = "dc-local")]
    /// The data center the node and its peers belong to.
    data_center: String,

    #[arg(long, default_value_t = 2)]
    /// The number of in-process peers to join to the cluster.
    peers: u32,

    #[arg(long, default_value_t = 5_000)]
    /// The time in milliseconds each request has to complete.
    deadline_ms: u64,

    #[arg(long)]
    /// Route equal words to the same worker rather than round robin.
    consistent_hash: bool,

    #[arg(long)]
    /// Bound each worker's cache to the given number of entries.
    cache_capacity: Option<NonZeroUsize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        Args::parse_from(std::iter::once("word-stats").chain(extra.iter().copied()))
    }

    #[test]
    fn test_peers_follow_the_node() -> Result<()> {
        let peers = peer_members(&args(&["--node-id", "7", "--public-addr", "127.0.0.1:9000"]))?;
        let ids = peers.iter().map(|member| member.node_id).collect::<Vec<_>>();
        let ports = peers.iter().map(|member| member.public_addr.port()).collect::<Vec<_>>();
        assert_eq!(ids, vec![8, 9]);
        assert_eq!(ports, vec![9001, 9002]);
        Ok(())
    }

    #[test]
    fn test_overflowing_peers_are_rejected() -> Result<()> {
        let last_id = u32::MAX.to_string();
        assert!(peer_members(&args(&["--node-id", &last_id])).is_err());
        assert!(peer_members(&args(&["--public-addr", "127.0.0.1:65535"])).is_err());

        let peers = u32::from(u16::MAX) + 1;
        assert!(peer_members(&args(&["--peers", &peers.to_string()])).is_err());
        assert!(peer_members(&args(&["--peers", "0"]))?.is_empty());
        Ok(())
    }
}
