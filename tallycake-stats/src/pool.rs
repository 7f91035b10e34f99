use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tallycake_node::{
    NodeId,
    RoutingError,
    RoutingPolicy,
    RoutingTable,
    RoutingTarget,
    RoutingWatcher,
};

use crate::messages::{PartialResult, Token};
use crate::worker::{WorkRequest, WorkerHandle};

/// Creates the worker hosted for a routing target.
pub(crate) type WorkerFactory = Box<dyn Fn(NodeId) -> WorkerHandle + Send + Sync>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// Where a token was routed to.
pub struct Routed {
    pub node_id: NodeId,
    /// The version of the routing table the decision was made against.
    pub table_version: u64,
}

struct PooledWorker {
    incarnation: u64,
    handle: WorkerHandle,
}

#[derive(Default)]
struct Workers {
    /// The routing table version the workers were last reconciled with.
    version: Option<u64>,
    members: BTreeMap<NodeId, PooledWorker>,
}

struct PoolInner {
    routing: RoutingWatcher,
    policy: Box<dyn RoutingPolicy>,
    role: Option<String>,
    factory: WorkerFactory,
    workers: RwLock<Workers>,
}

impl PoolInner {
    fn hosts_worker(&self, target: &RoutingTarget) -> bool {
        self.role
            .as_deref()
            .map_or(true, |role| target.member().has_role(role))
    }

    /// Aligns the set of running workers with the given routing table.
    ///
    /// Tables older than the last reconciled version are ignored.
    fn reconcile(&self, table: &RoutingTable) {
        let mut workers = self.workers.write();
        if matches!(workers.version, Some(version) if table.version() <= version) {
            return;
        }
        workers.version = Some(table.version());

        workers.members.retain(|node_id, worker| {
            let keep = table.get(*node_id).map_or(false, |target| {
                target.incarnation() == worker.incarnation && self.hosts_worker(target)
            });

            if !keep {
                info!(
                    target_node_id = %node_id,
                    version = table.version(),
                    "Removing worker for target no longer part of the routing table."
                );
            }

            keep
        });

        // Unreachable targets keep their worker so the cache survives recovery.
        for target in table.targets().filter(|target| self.hosts_worker(target)) {
            workers.members.entry(target.node_id()).or_insert_with(|| {
                info!(
                    target_node_id = %target.node_id(),
                    incarnation = target.incarnation(),
                    version = table.version(),
                    "Starting worker for routing target."
                );
                PooledWorker {
                    incarnation: target.incarnation(),
                    handle: (self.factory)(target.node_id()),
                }
            });
        }
    }

    fn worker_for(&self, table: &RoutingTable, node_id: NodeId) -> Option<WorkerHandle> {
        let incarnation = table.get(node_id)?.incarnation();
        let lookup = || {
            self.workers
                .read()
                .members
                .get(&node_id)
                .filter(|worker| worker.incarnation == incarnation)
                .map(|worker| worker.handle.clone())
        };

        if let Some(handle) = lookup() {
            return Some(handle);
        }

        // The background reconciliation may not have seen this table yet.
        self.reconcile(table);
        lookup()
    }
}

#[derive(Clone)]
/// The set of workers hosted for the routing targets, one per cluster node.
///
/// This handle is cheap to clone.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub(crate) fn start(
        routing: RoutingWatcher,
        policy: Box<dyn RoutingPolicy>,
        role: Option<String>,
        factory: WorkerFactory,
    ) -> Self {
        let inner = Arc::new(PoolInner {
            routing: routing.clone(),
            policy,
            role,
            factory,
            workers: RwLock::default(),
        });

        inner.reconcile(&routing.current());
        tokio::spawn(reconcile_workers(Arc::downgrade(&inner), routing));

        Self { inner }
    }

    /// Routes the token to a worker of an `Up` target.
    ///
    /// The target is chosen by the routing policy against a single routing
    /// table snapshot, if the chosen worker has shut down the next `Up`
    /// candidate is tried. The worker sends its result on `reply`.
    pub async fn dispatch(
        &self,
        token: Token,
        reply: &flume::Sender<PartialResult>,
    ) -> Result<Routed, RoutingError> {
        let table = self.inner.routing.current();
        let candidates = table
            .up_targets(self.inner.role.as_deref())
            .map(|target| target.node_id())
            .collect::<Vec<_>>();

        if candidates.is_empty() {
            return Err(RoutingError::NoWorkersAvailable);
        }

        let start = self.inner.policy.select(token.value(), &candidates) % candidates.len();
        let mut request = WorkRequest {
            token,
            reply: reply.clone(),
        };

        for offset in 0..candidates.len() {
            let node_id = candidates[(start + offset) % candidates.len()];
            let handle = match self.inner.worker_for(&table, node_id) {
                Some(handle) => handle,
                None => continue,
            };

            match handle.submit(request).await {
                Ok(()) => {
                    return Ok(Routed {
                        node_id,
                        table_version: table.version(),
                    })
                },
                Err(returned) => {
                    debug!(
                        target_node_id = %node_id,
                        "Worker mailbox is closed, trying the next target."
                    );
                    request = returned;
                },
            }
        }

        Err(RoutingError::NoWorkersAvailable)
    }

    /// The most recently published routing table.
    pub fn routing_table(&self) -> Arc<RoutingTable> {
        self.inner.routing.current()
    }

    /// The nodes a worker is currently running for.
    pub fn worker_ids(&self) -> Vec<NodeId> {
        self.inner.workers.read().members.keys().copied().collect()
    }

    pub fn num_workers(&self) -> usize {
        self.inner.workers.read().members.len()
    }
}

async fn reconcile_workers(pool: Weak<PoolInner>, mut routing: RoutingWatcher) {
    while let Ok(table) = routing.changed().await {
        let inner = match pool.upgrade() {
            Some(inner) => inner,
            None => break,
        };

        inner.reconcile(&table);
    }

    debug!("Worker pool reconciliation has stopped.");
}
