use std::time::Duration;

use futures::StreamExt;
use tallycake_node::{TallycakeNodeBuilder, TargetState};
use test_helper::{get_unused_addr, make_member, make_member_with_role, ManualMembership};

static TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_single_node() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let (_membership, events) = ManualMembership::new();
    let node = TallycakeNodeBuilder::new(1, get_unused_addr())
        .with_cluster_id("test-cluster")
        .with_role("compute")
        .start(events);

    let table = node.routing_table();
    assert_eq!(table.version(), 0);
    assert_eq!(table.state_of(1), Some(TargetState::Up));
    assert!(node.me().has_role("compute"));
    assert_eq!(node.cluster_id(), "test-cluster");
    assert_eq!(node.statistics().num_live_members(), 1);

    node.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_members_join_and_leave() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let (membership, events) = ManualMembership::new();
    let node = TallycakeNodeBuilder::new(1, get_unused_addr()).start(events);
    let mut changes = node.membership_changes();
    // The initial, empty, summary.
    changes.next().await;

    membership.join(make_member(2));
    membership.join(make_member_with_role(3, "compute"));
    node.wait_for_nodes(&[1, 2, 3], TIMEOUT).await?;

    let stats = node.statistics();
    assert_eq!(stats.num_live_members(), 3);
    assert_eq!(stats.num_data_centers(), 2);
    assert_eq!(
        node.routing_table()
            .up_targets(Some("compute"))
            .map(|target| target.node_id())
            .collect::<Vec<_>>(),
        vec![3],
    );

    membership.leave(2);
    let table = node
        .routing()
        .wait_for(|table| table.get(2).is_none(), TIMEOUT)
        .await?;
    assert_eq!(table.len(), 2);
    assert_eq!(table.version(), 3);

    let wait_for_left = async {
        while let Some(change) = changes.next().await {
            if !change.left.is_empty() {
                return Some(change);
            }
        }
        None
    };
    let change = tokio::time::timeout(TIMEOUT, wait_for_left)
        .await?
        .expect("Change stream should be alive");
    assert_eq!(
        change.left.iter().map(|member| member.node_id).collect::<Vec<_>>(),
        vec![2],
    );
    assert!(change.joined.is_empty());

    node.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unreachable_member_recovers() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let (membership, events) = ManualMembership::new();
    let node = TallycakeNodeBuilder::new(1, get_unused_addr()).start(events);
    let routing = node.routing();
    let statistics = node.statistics();

    membership.join(make_member(2));
    node.wait_for_nodes(&[2], TIMEOUT).await?;

    membership.unreachable(2);
    let table = routing
        .wait_for(|table| table.num_unreachable() == 1, TIMEOUT)
        .await?;
    assert_eq!(table.state_of(2), Some(TargetState::Unreachable));
    assert_eq!(table.num_up(), 1);
    assert_eq!(statistics.num_unreachable_members(), 1);

    membership.reachable(2);
    node.wait_for_nodes(&[1, 2], TIMEOUT).await?;
    assert_eq!(statistics.num_unreachable_members(), 0);

    // Events for unknown members are ignored.
    let version = node.routing_table().version();
    membership.unreachable(9);
    membership.leave(9);
    membership.join(make_member(4));
    let table = node
        .routing()
        .wait_for(|table| table.get(4).is_some(), TIMEOUT)
        .await?;
    assert_eq!(table.version(), version + 1);

    node.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_rejoin_creates_new_incarnation() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let (membership, events) = ManualMembership::new();
    let node = TallycakeNodeBuilder::new(1, get_unused_addr()).start(events);

    membership.join(make_member(2));
    let first = node
        .routing()
        .wait_for(|table| table.get(2).is_some(), TIMEOUT)
        .await?
        .get(2)
        .map(|target| target.incarnation());

    membership.leave(2);
    membership.unreachable(2);
    membership.join(make_member(2));
    let table = node
        .routing()
        .wait_for(|table| table.version() == 3, TIMEOUT)
        .await?;

    let target = table.get(2).expect("Target should have rejoined");
    assert_eq!(target.state(), TargetState::Up);
    assert_ne!(Some(target.incarnation()), first);

    node.shutdown().await;
    Ok(())
}
