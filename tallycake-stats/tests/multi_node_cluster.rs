use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tallycake_node::{ConsistentHash, NodeId, TallycakeNode, TallycakeNodeBuilder};
use tallycake_stats::test_utils::ScriptedCompute;
use tallycake_stats::{
    Statistic,
    StatsReply,
    StatsServiceExtension,
    Token,
    WorkerPool,
    WordLength,
};
use test_helper::{get_unused_addr, make_member, make_member_with_role, ManualMembership};

static TIMEOUT: Duration = Duration::from_secs(5);

async fn start_cluster(node_ids: &[NodeId]) -> anyhow::Result<(TallycakeNode, ManualMembership)> {
    let (membership, events) = ManualMembership::new();
    let node = TallycakeNodeBuilder::new(1, get_unused_addr()).start(events);

    for node_id in node_ids.iter().copied().filter(|node_id| *node_id != 1) {
        membership.join(make_member(node_id));
    }
    node.wait_for_nodes(node_ids, TIMEOUT).await?;

    Ok((node, membership))
}

async fn wait_for_workers(pool: &WorkerPool, expected: &[NodeId]) -> anyhow::Result<()> {
    let wait = async {
        while pool.worker_ids() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };

    tokio::time::timeout(TIMEOUT, wait).await.map_err(|_| {
        anyhow::anyhow!("Expected workers {expected:?}, got {:?}", pool.worker_ids())
    })
}

#[tokio::test]
async fn test_request_spans_cluster() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let (node, _membership) = start_cluster(&[1, 2, 3]).await?;
    let service = node
        .add_extension(StatsServiceExtension::new(WordLength))
        .await?;
    assert_eq!(service.pool().worker_ids(), vec![1, 2, 3]);

    let reply = service.handle().request("a bb ccc").await;
    assert!(reply.is_complete());
    assert_eq!(reply.mean(), Some(2.0));

    node.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_pool_follows_membership() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let (node, membership) = start_cluster(&[1]).await?;
    let service = node
        .add_extension(StatsServiceExtension::new(WordLength))
        .await?;
    let pool = service.pool();

    membership.join(make_member(2));
    membership.join(make_member(3));
    wait_for_workers(pool, &[1, 2, 3]).await?;

    membership.leave(2);
    wait_for_workers(pool, &[1, 3]).await?;

    // Unreachable targets keep their worker but are not routed to.
    membership.unreachable(3);
    node.routing()
        .wait_for(|table| table.num_up() == 1, TIMEOUT)
        .await?;
    assert_eq!(pool.worker_ids(), vec![1, 3]);

    let (reply, results) = flume::unbounded();
    for index in 0..10 {
        let routed = pool.dispatch(Token::new(0, index, "bb"), &reply).await?;
        assert_eq!(routed.node_id, 1);
    }

    membership.reachable(3);
    node.wait_for_nodes(&[1, 3], TIMEOUT).await?;

    let mut routed_to = BTreeSet::new();
    for index in 10..20 {
        let routed = pool.dispatch(Token::new(0, index, "bb"), &reply).await?;
        routed_to.insert(routed.node_id);
    }
    assert_eq!(routed_to, BTreeSet::from([1, 3]));

    drop(reply);
    let mut num_results = 0;
    while results.recv_async().await.is_ok() {
        num_results += 1;
    }
    assert_eq!(num_results, 20);

    node.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_no_workers_fails_immediately() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let (node, membership) = start_cluster(&[1, 2]).await?;
    let service = node
        .add_extension(StatsServiceExtension::new(WordLength).with_worker_role("compute"))
        .await?;
    assert_eq!(service.pool().num_workers(), 0);

    let reply = service.handle().request("a bb ccc").await;
    assert_eq!(
        reply,
        StatsReply::Failed(tallycake_stats::JobError::AggregationTimeout {
            expected: 3,
            failed: 3
        }),
    );
    assert_eq!(service.statistics().num_routing_failures(), 3);

    membership.join(make_member_with_role(3, "compute"));
    wait_for_workers(service.pool(), &[3]).await?;

    let reply = service.handle().request("a bb ccc").await;
    assert_eq!(reply.mean(), Some(2.0));

    node.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_consistent_hash_keeps_tokens_on_one_worker() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let (node, _membership) = start_cluster(&[1, 2, 3, 4]).await?;
    let compute = Arc::new(ScriptedCompute::default());
    let service = node
        .add_extension(StatsServiceExtension::new(compute.clone()).with_policy(ConsistentHash))
        .await?;
    let handle = service.handle();

    for _ in 0..5 {
        let reply = handle.request("token token token").await;
        assert_eq!(reply.mean(), Some(5.0));
    }

    assert_eq!(compute.calls(), 1, "Every repeat should hit the same worker's cache.");
    assert_eq!(service.statistics().num_cache_hits(), 14);

    node.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_routing_is_safe_during_removal() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let (node, membership) = start_cluster(&[1, 2, 3]).await?;
    let service = node
        .add_extension(StatsServiceExtension::new(WordLength))
        .await?;
    let pool = service.pool().clone();

    let (reply, results) = flume::unbounded();
    let mut tasks = Vec::with_capacity(1_000);
    for index in 0..1_000 {
        let pool = pool.clone();
        let reply = reply.clone();
        tasks.push(tokio::spawn(async move {
            if index % 10 == 0 {
                tokio::task::yield_now().await;
            }
            pool.dispatch(Token::new(0, index, "ccc"), &reply).await
        }));

        if index == 500 {
            membership.leave(3);
        }
    }

    let removal = node
        .routing()
        .wait_for(|table| table.get(3).is_none(), TIMEOUT)
        .await?;

    let mut routed = Vec::with_capacity(tasks.len());
    for task in tasks {
        routed.push(task.await??);
    }

    for decision in routed.iter() {
        if decision.table_version >= removal.version() {
            assert_ne!(decision.node_id, 3, "Token routed to a removed target.");
        }
    }

    // Tokens routed before the removal still report back.
    drop(reply);
    let mut indices = BTreeSet::new();
    while let Ok(result) = results.recv_async().await {
        assert!(result.is_success());
        indices.insert(result.token_index);
    }
    assert_eq!(indices.len(), 1_000);

    node.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_target_lost_mid_request() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let (membership, events) = ManualMembership::new();
    let node = TallycakeNodeBuilder::new(1, get_unused_addr()).start(events);
    membership.join(make_member_with_role(2, "compute"));
    node.wait_for_nodes(&[1, 2], TIMEOUT).await?;

    let compute = ScriptedCompute::default().with_default_delay(Duration::from_secs(1));
    let extension = StatsServiceExtension::new(compute)
        .with_worker_role("compute")
        .with_deadline(Duration::from_secs(60))
        .with_mailbox_capacity(1);
    let service = node.add_extension(extension).await?;
    assert_eq!(service.pool().worker_ids(), vec![2]);

    // Routing stalls on the third token while the only worker is busy.
    let pending = service.handle().submit("a bb ccc dddd eeeee");
    tokio::time::sleep(Duration::from_millis(100)).await;

    membership.leave(2);
    node.routing()
        .wait_for(|table| table.get(2).is_none(), TIMEOUT)
        .await?;

    let reply = pending.recv().await;
    assert_eq!(
        reply,
        StatsReply::Partial(Statistic {
            mean: 2.0,
            received: 3,
            expected: 5,
            failures: 2,
        }),
    );
    assert_eq!(service.statistics().num_routing_failures(), 2);
    assert_eq!(service.statistics().num_partial(), 1);

    node.shutdown().await;
    Ok(())
}
