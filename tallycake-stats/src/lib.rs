//! # Tallycake Stats
//! A cluster aware fan-out/fan-in statistics service.
//!
//! A request is split into tokens which are routed to one worker per cluster
//! node, each worker memoizes the results it computes in its own cache. A
//! per-request aggregation job collects the partial results and replies with
//! the mean of the values, degrading to a flagged partial answer if the deadline
//! passes before every token reports back.
//!
//! ```rust
//! use std::net::SocketAddr;
//! use tallycake_node::{MembershipEvent, TallycakeNodeBuilder};
//! use tallycake_stats::{StatsServiceExtension, WordLength};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let addr = "127.0.0.1:8080".parse::<SocketAddr>().unwrap();
//!     let (_events_tx, events) = futures::channel::mpsc::unbounded::<MembershipEvent>();
//!     let node = TallycakeNodeBuilder::new(1, addr).start(events);
//!
//!     let service = node
//!         .add_extension(StatsServiceExtension::new(WordLength))
//!         .await?;
//!
//!     let reply = service.handle().request("a bb ccc").await;
//!     assert_eq!(reply.mean(), Some(2.0));
//!
//!     node.shutdown().await;
//!     Ok(())
//! }
//! ```

#[macro_use]
extern crate tracing;

mod aggregator;
mod cache;
mod compute;
mod dispatcher;
mod error;
mod messages;
mod pool;
mod statistics;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
mod worker;

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
pub use cache::Cache;
pub use compute::{Splitter, TokenCompute, WhitespaceSplitter, WordLength};
pub use dispatcher::{ReplyHandle, StatsHandle};
pub use error::{JobError, StatsError, TokenError};
pub use messages::{Computed, PartialResult, RequestId, Statistic, StatsReply, Token};
pub use pool::{Routed, WorkerPool};
pub use statistics::ServiceStatistics;
use tallycake_node::{
    ClusterExtension,
    RoundRobin,
    RoutingPolicy,
    RoutingWatcher,
    TallycakeNode,
};
pub use worker::{Worker, WorkerHandle};

use crate::pool::WorkerFactory;
use crate::worker::{spawn_worker, WorkerConfig};

/// The time a request has to complete unless configured otherwise.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);
/// The number of tokens which can be queued for a single worker.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 512;

/// Runs the statistics service on a tallycake node.
///
/// A worker is hosted for every member of the cluster, or only those carrying
/// the configured worker role, and follows the node's routing table.
pub struct StatsServiceExtension<C> {
    compute: C,
    deadline: Duration,
    policy: Box<dyn RoutingPolicy>,
    splitter: Box<dyn Splitter>,
    worker_role: Option<String>,
    cache_capacity: Option<NonZeroUsize>,
    mailbox_capacity: usize,
}

impl<C> StatsServiceExtension<C>
where
    C: TokenCompute,
{
    /// Creates a new extension computing token results with `compute`.
    ///
    /// Tokens are routed round robin with an unbounded cache per worker.
    pub fn new(compute: C) -> Self {
        Self {
            compute,
            deadline: DEFAULT_DEADLINE,
            policy: Box::new(RoundRobin::default()),
            splitter: Box::new(WhitespaceSplitter),
            worker_role: None,
            cache_capacity: None,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }

    /// Set the default deadline requests must complete within.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set the policy choosing which worker a token is routed to.
    pub fn with_policy(mut self, policy: impl RoutingPolicy) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Set how requests are split into tokens.
    pub fn with_splitter(mut self, splitter: impl Splitter) -> Self {
        self.splitter = Box::new(splitter);
        self
    }

    /// Only host workers on members carrying the given role.
    pub fn with_worker_role(mut self, role: impl Into<String>) -> Self {
        self.worker_role = Some(role.into());
        self
    }

    /// Bound each worker's cache, evicting the least recently used entries.
    pub fn with_cache_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Starts the service, following the routing table of `routing`.
    ///
    /// This must be called from within a tokio runtime.
    pub fn start(self, routing: RoutingWatcher) -> Result<StatsService, StatsError> {
        if self.deadline.is_zero() {
            return Err(StatsError::InvalidConfig("The deadline must be non-zero."));
        }

        if self.mailbox_capacity == 0 {
            return Err(StatsError::InvalidConfig(
                "The worker mailbox capacity must be non-zero.",
            ));
        }

        let statistics = ServiceStatistics::default();
        let compute = Arc::new(self.compute);
        let config = WorkerConfig {
            mailbox_capacity: self.mailbox_capacity,
            cache_capacity: self.cache_capacity,
        };

        let factory: WorkerFactory = {
            let statistics = statistics.clone();
            Box::new(move |node_id| {
                spawn_worker(node_id, compute.clone(), &config, statistics.clone())
            })
        };

        let pool = WorkerPool::start(routing, self.policy, self.worker_role, factory);
        let handle = StatsHandle::new(pool, self.splitter, self.deadline, statistics.clone());

        info!(
            deadline = ?self.deadline,
            cache_capacity = ?self.cache_capacity,
            mailbox_capacity = self.mailbox_capacity,
            num_workers = handle.pool().num_workers(),
            "Statistics service started."
        );

        Ok(StatsService { handle, statistics })
    }
}

#[async_trait]
impl<C> ClusterExtension for StatsServiceExtension<C>
where
    C: TokenCompute,
{
    type Output = StatsService;
    type Error = StatsError;

    async fn init_extension(self, node: &TallycakeNode) -> Result<Self::Output, Self::Error> {
        self.start(node.routing())
    }
}

/// A running statistics service.
pub struct StatsService {
    handle: StatsHandle,
    statistics: ServiceStatistics,
}

impl StatsService {
    #[inline]
    /// Creates a new handle for submitting requests.
    pub fn handle(&self) -> StatsHandle {
        self.handle.clone()
    }

    #[inline]
    pub fn pool(&self) -> &WorkerPool {
        self.handle.pool()
    }

    #[inline]
    /// Gets the live service statistics.
    pub fn statistics(&self) -> &ServiceStatistics {
        &self.statistics
    }
}

#[cfg(test)]
mod tests {
    use tallycake_node::{ClusterStatistics, MembershipTracker};
    use test_helper::{make_member, ManualMembership};

    use super::*;

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let (_membership, events) = ManualMembership::new();
        let tracker =
            MembershipTracker::start(make_member(1), events, ClusterStatistics::default());

        let res = StatsServiceExtension::new(WordLength)
            .with_deadline(Duration::ZERO)
            .start(tracker.routing().clone());
        assert!(matches!(res, Err(StatsError::InvalidConfig(_))));

        let res = StatsServiceExtension::new(WordLength)
            .with_mailbox_capacity(0)
            .start(tracker.routing().clone());
        assert!(matches!(res, Err(StatsError::InvalidConfig(_))));

        tracker.shutdown().await;
    }
}
