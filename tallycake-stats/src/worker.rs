use std::num::NonZeroUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tallycake_node::NodeId;

use crate::cache::Cache;
use crate::compute::TokenCompute;
use crate::error::TokenError;
use crate::messages::{Computed, PartialResult, RequestId, Token};
use crate::statistics::ServiceStatistics;

/// A token routed to a worker along with where its result should be sent.
pub(crate) struct WorkRequest {
    pub(crate) token: Token,
    pub(crate) reply: flume::Sender<PartialResult>,
}

#[derive(Clone)]
/// A handle to a running worker's mailbox.
///
/// This handle is cheap to clone.
pub struct WorkerHandle {
    node_id: NodeId,
    tx: flume::Sender<WorkRequest>,
}

impl WorkerHandle {
    #[inline]
    /// The node the worker is hosted for.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    #[inline]
    /// Returns if the worker has stopped accepting tokens.
    pub fn is_closed(&self) -> bool {
        self.tx.is_disconnected()
    }

    /// Submits a request to the worker, waiting for mailbox capacity.
    ///
    /// If the worker has shut down the request is handed back.
    pub(crate) async fn submit(&self, request: WorkRequest) -> Result<(), WorkRequest> {
        self.tx.send_async(request).await.map_err(|error| error.into_inner())
    }
}

/// Computes results for single tokens, memoizing each in its local cache.
pub struct Worker<C> {
    node_id: NodeId,
    compute: Arc<C>,
    cache: Cache,
    statistics: ServiceStatistics,
}

impl<C> Worker<C>
where
    C: TokenCompute,
{
    pub fn new(
        node_id: NodeId,
        compute: Arc<C>,
        cache: Cache,
        statistics: ServiceStatistics,
    ) -> Self {
        Self {
            node_id,
            compute,
            cache,
            statistics,
        }
    }

    #[inline]
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Computes the result of the token, serving it from the cache if possible.
    ///
    /// A failed computation is not cached.
    pub async fn handle(&mut self, token: &str) -> Result<Computed, TokenError> {
        if let Some(value) = self.cache.lookup(token) {
            self.statistics
                .num_cache_hits
                .fetch_add(1, Ordering::Relaxed);
            return Ok(Computed {
                value,
                cached: true,
            });
        }

        self.statistics
            .num_cache_misses
            .fetch_add(1, Ordering::Relaxed);

        let value = match self.compute.compute(token).await {
            Ok(value) => value,
            Err(error) => {
                self.statistics
                    .num_compute_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    node_id = %self.node_id,
                    token = %token,
                    error = %error,
                    "Failed to compute token result."
                );
                return Err(TokenError::ComputationFailure(error.to_string()));
            },
        };

        self.cache.store(token.to_owned(), value);
        Ok(Computed {
            value,
            cached: false,
        })
    }

    async fn run(mut self, requests: flume::Receiver<WorkRequest>) {
        while let Ok(request) = requests.recv_async().await {
            let in_flight = InFlight::new(&request);
            let outcome = self.handle(request.token.value()).await;
            in_flight.finish(outcome);
        }
    }
}

/// Reports the token as lost if the worker unwinds before replying.
struct InFlight {
    reply: Option<flume::Sender<PartialResult>>,
    request_id: RequestId,
    token_index: usize,
}

impl InFlight {
    fn new(request: &WorkRequest) -> Self {
        Self {
            reply: Some(request.reply.clone()),
            request_id: request.token.request_id(),
            token_index: request.token.index(),
        }
    }

    fn finish(mut self, outcome: Result<Computed, TokenError>) {
        if let Some(reply) = self.reply.take() {
            // The aggregator may have already completed.
            let _ = reply.send(PartialResult {
                request_id: self.request_id,
                token_index: self.token_index,
                outcome,
            });
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(PartialResult::failed(
                self.request_id,
                self.token_index,
                TokenError::WorkerLost,
            ));
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct WorkerConfig {
    pub(crate) mailbox_capacity: usize,
    pub(crate) cache_capacity: Option<NonZeroUsize>,
}

/// Spawns a supervised worker for the given node, returning the mailbox handle.
pub(crate) fn spawn_worker<C>(
    node_id: NodeId,
    compute: Arc<C>,
    config: &WorkerConfig,
    statistics: ServiceStatistics,
) -> WorkerHandle
where
    C: TokenCompute,
{
    let (tx, rx) = flume::bounded(config.mailbox_capacity);

    tokio::spawn(supervise_worker(
        node_id,
        compute,
        config.cache_capacity,
        rx,
        statistics,
    ));

    WorkerHandle { node_id, tx }
}

/// Runs the worker, replacing it with a fresh instance if it crashes.
///
/// The replacement starts with an empty cache and continues reading from the
/// same mailbox. The supervisor exits once the mailbox is closed and drained.
async fn supervise_worker<C>(
    node_id: NodeId,
    compute: Arc<C>,
    cache_capacity: Option<NonZeroUsize>,
    requests: flume::Receiver<WorkRequest>,
    statistics: ServiceStatistics,
) where
    C: TokenCompute,
{
    debug!(node_id = %node_id, "Worker is running.");

    loop {
        let worker = Worker::new(
            node_id,
            compute.clone(),
            Cache::new(cache_capacity),
            statistics.clone(),
        );

        match tokio::spawn(worker.run(requests.clone())).await {
            Ok(()) => {
                debug!(node_id = %node_id, "Worker mailbox has closed. Stopping.");
                break;
            },
            Err(error) if error.is_panic() => {
                statistics
                    .num_worker_restarts
                    .fetch_add(1, Ordering::Relaxed);
                error!(
                    node_id = %node_id,
                    error = ?error,
                    "Worker crashed, restarting with a fresh state."
                );
            },
            Err(error) => {
                debug!(node_id = %node_id, error = ?error, "Worker was cancelled. Stopping.");
                break;
            },
        }
    }
}
