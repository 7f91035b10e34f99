//! # Tallycake Node
//! Cluster membership tracking and membership-aware routing.
//!
//! A node learns about the rest of the cluster from an external membership source,
//! any [Stream](futures::Stream) of [MembershipEvent]s, and maintains a versioned
//! [RoutingTable] of the members which can currently be routed to. Extensions, like the
//! statistics service, are attached to the node via [TallycakeNode::add_extension].
//!
//! ```rust
//! use std::net::SocketAddr;
//! use tallycake_node::{MembershipEvent, TallycakeNodeBuilder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let addr = "127.0.0.1:8080".parse::<SocketAddr>().unwrap();
//!     let (events_tx, events) = futures::channel::mpsc::unbounded::<MembershipEvent>();
//!
//!     let node = TallycakeNodeBuilder::new(1, addr)
//!         .with_role("compute")
//!         .start(events);
//!
//!     assert_eq!(node.routing_table().num_up(), 1);
//!
//!     drop(events_tx);
//!     node.shutdown().await;
//!     Ok(())
//! }
//! ```

mod error;
mod extension;
mod membership;
mod node;
mod nodes_selector;
mod routing;
mod statistics;

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub use error::{NodeError, RoutingError};
pub use extension::ClusterExtension;
use futures::Stream;
pub use membership::{MembershipChange, MembershipTracker, RoutingWatcher};
pub use node::{ClusterMember, NodeId};
pub use nodes_selector::{ConsistentHash, RoundRobin, RoutingPolicy};
pub use routing::{MembershipEvent, RoutingTable, RoutingTarget, TargetState, Transition};
pub use statistics::ClusterStatistics;
use tokio_stream::wrappers::WatchStream;
use tracing::info;

pub static DEFAULT_CLUSTER_ID: &str = "tallycake-cluster-unknown";
pub static DEFAULT_DATA_CENTER: &str = "tallycake-dc-unknown";

/// Build a tallycake node using provided settings.
pub struct TallycakeNodeBuilder {
    node_id: NodeId,
    public_addr: SocketAddr,
    cluster_id: String,
    data_center: Cow<'static, str>,
    roles: BTreeSet<String>,
}

impl TallycakeNodeBuilder {
    /// Create a new node builder.
    pub fn new(node_id: NodeId, public_addr: SocketAddr) -> Self {
        Self {
            node_id,
            public_addr,
            cluster_id: DEFAULT_CLUSTER_ID.to_string(),
            data_center: Cow::Borrowed(DEFAULT_DATA_CENTER),
            roles: BTreeSet::new(),
        }
    }

    /// Set the cluster id for the given node.
    pub fn with_cluster_id(mut self, cluster_id: impl Display) -> Self {
        self.cluster_id = cluster_id.to_string();
        self
    }

    /// Set the data center the node belongs to.
    pub fn with_data_center(mut self, dc: impl Display) -> Self {
        self.data_center = Cow::Owned(dc.to_string());
        self
    }

    /// Add a role the node is started with.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Add several roles the node is started with.
    pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    /// Starts the node, tracking the membership events produced by `source`.
    ///
    /// The `node_id` **must be unique** within the cluster, the membership source
    /// is expected to identify nodes by the same ID.
    ///
    /// The node itself is part of the routing table from the start, no other
    /// members need to be live for the node to start correctly.
    pub fn start<S>(self, source: S) -> TallycakeNode
    where
        S: Stream<Item = MembershipEvent> + Send + 'static,
    {
        let me = ClusterMember::new(self.node_id, self.public_addr, self.data_center.as_ref())
            .with_roles(self.roles);

        let statistics = ClusterStatistics::default();
        let tracker = MembershipTracker::start(me.clone(), source, statistics);

        info!(
            node_id = %me.node_id,
            cluster_id = %self.cluster_id,
            public_addr = %me.public_addr,
            data_center = %me.data_center,
            roles = ?me.roles,
            "Tallycake node started."
        );

        TallycakeNode {
            me: Arc::new(me),
            cluster_id: self.cluster_id,
            tracker,
        }
    }
}

pub struct TallycakeNode {
    me: Arc<ClusterMember>,
    cluster_id: String,
    tracker: MembershipTracker,
}

impl TallycakeNode {
    /// Shuts down the node, stopping the membership tracker.
    pub async fn shutdown(self) {
        info!(node_id = %self.me.node_id, "Shutting down the node.");
        self.tracker.shutdown().await;
    }

    /// Adds an extension to the node, returning the output of the extension.
    pub async fn add_extension<E>(&self, extension: E) -> Result<E::Output, E::Error>
    where
        E: ClusterExtension,
    {
        extension.init_extension(self).await
    }

    #[inline]
    /// Return the cluster member of the node itself.
    pub fn me(&self) -> &ClusterMember {
        self.me.as_ref()
    }

    #[inline]
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    #[inline]
    /// Gets the live cluster statistics.
    pub fn statistics(&self) -> ClusterStatistics {
        self.tracker.statistics()
    }

    #[inline]
    /// The most recently published routing table.
    pub fn routing_table(&self) -> Arc<RoutingTable> {
        self.tracker.routing().current()
    }

    #[inline]
    /// A handle to the live routing table.
    pub fn routing(&self) -> RoutingWatcher {
        self.tracker.routing().clone()
    }

    #[inline]
    /// Get a stream of membership changes.
    pub fn membership_changes(&self) -> WatchStream<MembershipChange> {
        self.tracker.membership_changes()
    }

    /// Waits for the given nodes to be routable.
    pub async fn wait_for_nodes(
        &self,
        node_ids: &[NodeId],
        timeout_after: Duration,
    ) -> Result<(), NodeError> {
        self.tracker
            .routing()
            .wait_for(
                |table| {
                    node_ids
                        .iter()
                        .all(|node_id| table.state_of(*node_id) == Some(TargetState::Up))
                },
                timeout_after,
            )
            .await?;
        Ok(())
    }
}
