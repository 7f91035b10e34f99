use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::node::{ClusterMember, NodeId};
use crate::routing::{MembershipEvent, RoutingTable, TargetState, Transition};
use crate::statistics::ClusterStatistics;

#[derive(Clone, Debug, Default)]
/// A summary of the most recent change applied to the routing table.
pub struct MembershipChange {
    pub joined: Vec<ClusterMember>,
    pub left: Vec<ClusterMember>,
    pub unreachable: Vec<ClusterMember>,
    pub reachable: Vec<ClusterMember>,
}

impl From<Transition> for MembershipChange {
    fn from(transition: Transition) -> Self {
        let mut change = Self::default();
        match (transition.from, transition.to) {
            (None, TargetState::Up) => change.joined.push(transition.member),
            (_, TargetState::Removed) => change.left.push(transition.member),
            (_, TargetState::Unreachable) => change.unreachable.push(transition.member),
            (Some(_), TargetState::Up) => change.reachable.push(transition.member),
        }
        change
    }
}

#[derive(Clone)]
/// A read handle to the live routing table.
///
/// Every read returns a complete snapshot, this handle is cheap to clone.
pub struct RoutingWatcher(watch::Receiver<Arc<RoutingTable>>);

impl RoutingWatcher {
    #[inline]
    /// The most recently published routing table.
    pub fn current(&self) -> Arc<RoutingTable> {
        self.0.borrow().clone()
    }

    /// Waits for the next routing table to be published.
    pub async fn changed(&mut self) -> Result<Arc<RoutingTable>, NodeError> {
        self.0
            .changed()
            .await
            .map_err(|_| NodeError::TrackerStopped)?;
        Ok(self.0.borrow_and_update().clone())
    }

    /// Waits for the predicate to hold true for the routing table.
    pub async fn wait_for<F>(
        &self,
        mut predicate: F,
        timeout_after: Duration,
    ) -> Result<Arc<RoutingTable>, NodeError>
    where
        F: FnMut(&RoutingTable) -> bool,
    {
        let mut rx = self.0.clone();
        let wait = async move {
            loop {
                let table = rx.borrow_and_update().clone();
                if predicate(&table) {
                    return Ok(table);
                }

                if rx.changed().await.is_err() {
                    return Err(NodeError::TrackerStopped);
                }
            }
        };

        tokio::time::timeout(timeout_after, wait)
            .await
            .map_err(|_| NodeError::Timeout(timeout_after))?
    }
}

/// Observes the cluster membership and maintains the routing table.
///
/// The tracker is the only writer of the routing table, every applied event
/// publishes a new snapshot with an incremented version.
pub struct MembershipTracker {
    routing: RoutingWatcher,
    changes: watch::Receiver<MembershipChange>,
    statistics: ClusterStatistics,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl MembershipTracker {
    /// Starts tracking the membership of the cluster.
    ///
    /// The local member is part of the initial routing table, the remaining
    /// members are learned from the `source`.
    pub fn start<S>(me: ClusterMember, source: S, statistics: ClusterStatistics) -> Self
    where
        S: Stream<Item = MembershipEvent> + Send + 'static,
    {
        let self_node_id = me.node_id;
        let table = RoutingTable::new([me]);
        update_statistics(&statistics, &table);

        let (routing_tx, routing_rx) = watch::channel(Arc::new(table));
        let (changes_tx, changes_rx) = watch::channel(MembershipChange::default());
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = tokio::spawn(watch_membership_events(
            self_node_id,
            source,
            routing_tx,
            changes_tx,
            statistics.clone(),
            stop_rx,
        ));

        Self {
            routing: RoutingWatcher(routing_rx),
            changes: changes_rx,
            statistics,
            stop: stop_tx,
            task,
        }
    }

    #[inline]
    pub fn routing(&self) -> &RoutingWatcher {
        &self.routing
    }

    #[inline]
    pub fn statistics(&self) -> ClusterStatistics {
        self.statistics.clone()
    }

    /// Get a stream of membership changes.
    pub fn membership_changes(&self) -> WatchStream<MembershipChange> {
        WatchStream::new(self.changes.clone())
    }

    /// Stops the tracker, the last published routing table remains readable.
    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        if let Err(error) = self.task.await {
            warn!(error = ?error, "Membership tracker did not shut down cleanly.");
        }
    }
}

async fn watch_membership_events<S>(
    self_node_id: NodeId,
    source: S,
    routing_tx: watch::Sender<Arc<RoutingTable>>,
    changes_tx: watch::Sender<MembershipChange>,
    statistics: ClusterStatistics,
    mut stop: oneshot::Receiver<()>,
) where
    S: Stream<Item = MembershipEvent>,
{
    let mut source = Box::pin(source);
    loop {
        let event = tokio::select! {
            _ = &mut stop => {
                debug!(self_node_id = %self_node_id, "Received a stop signal. Stopping.");
                break;
            },
            event = source.next() => match event {
                Some(event) => event,
                None => {
                    info!(self_node_id = %self_node_id, "Membership source has ended. Stopping.");
                    break;
                },
            },
        };

        let current = routing_tx.borrow().clone();
        let (next, transition) = match current.apply(&event) {
            Some(applied) => applied,
            None => {
                debug!(
                    self_node_id = %self_node_id,
                    event = ?event,
                    "Membership event did not change the routing table."
                );
                continue;
            },
        };

        info!(
            self_node_id = %self_node_id,
            target_node_id = %transition.member.node_id,
            target_addr = %transition.member.public_addr,
            from = ?transition.from,
            to = ?transition.to,
            version = next.version(),
            num_members = next.len(),
            "Cluster membership has changed."
        );

        statistics
            .num_membership_changes
            .fetch_add(1, Ordering::Relaxed);
        update_statistics(&statistics, &next);

        routing_tx.send_replace(Arc::new(next));
        let _ = changes_tx.send(MembershipChange::from(transition));
    }
}

fn update_statistics(statistics: &ClusterStatistics, table: &RoutingTable) {
    let data_centers = table
        .targets()
        .map(|target| target.member().data_center.as_str())
        .collect::<BTreeSet<_>>();

    statistics
        .num_live_members
        .store(table.num_up() as u64, Ordering::Relaxed);
    statistics
        .num_unreachable_members
        .store(table.num_unreachable() as u64, Ordering::Relaxed);
    statistics
        .num_data_centers
        .store(data_centers.len() as u64, Ordering::Relaxed);
}
