use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::aggregator::{run_aggregator, AggregationJob, Control};
use crate::compute::Splitter;
use crate::error::JobError;
use crate::messages::{RequestId, StatsReply, Token};
use crate::pool::WorkerPool;
use crate::statistics::ServiceStatistics;

/// The deadline used when the requested one cannot be represented as an instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// The pending reply of a submitted request.
pub struct ReplyHandle {
    request_id: Option<RequestId>,
    rx: oneshot::Receiver<StatsReply>,
}

impl ReplyHandle {
    #[inline]
    /// The ID assigned to the request.
    ///
    /// Empty requests are answered immediately and are never assigned an ID.
    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id
    }

    /// Waits for the reply of the request.
    pub async fn recv(self) -> StatsReply {
        self.rx
            .await
            .unwrap_or(StatsReply::Failed(JobError::Aborted))
    }
}

struct JobEntry {
    control: flume::Sender<Control>,
    started: Instant,
    expected: usize,
}

#[derive(Default)]
/// Tracks the in-flight aggregation jobs by their request ID.
struct JobRegistry {
    next_id: AtomicU64,
    jobs: Mutex<BTreeMap<RequestId, JobEntry>>,
}

impl JobRegistry {
    fn next_request_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn register(&self, request_id: RequestId, entry: JobEntry) {
        self.jobs.lock().insert(request_id, entry);
    }

    fn remove(&self, request_id: RequestId) -> Option<JobEntry> {
        self.jobs.lock().remove(&request_id)
    }

    fn len(&self) -> usize {
        self.jobs.lock().len()
    }
}

/// Unregisters the job when its aggregator exits, however it exits.
struct JobGuard {
    request_id: RequestId,
    inner: Arc<DispatcherInner>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if let Some(entry) = self.inner.registry.remove(self.request_id) {
            trace!(
                request_id = self.request_id,
                expected = entry.expected,
                elapsed = ?entry.started.elapsed(),
                "Removed job from the registry."
            );
        }

        self.inner
            .statistics
            .num_live_jobs
            .fetch_sub(1, Ordering::Relaxed);
    }
}

pub(crate) struct DispatcherInner {
    pool: WorkerPool,
    splitter: Box<dyn Splitter>,
    registry: JobRegistry,
    deadline: Duration,
    statistics: ServiceStatistics,
}

#[derive(Clone)]
/// The front-end of the statistics service.
///
/// A handle only splits requests and hands them to a freshly spawned
/// aggregation job, it holds no per-request state itself.
///
/// This handle is cheap to clone.
pub struct StatsHandle {
    inner: Arc<DispatcherInner>,
}

impl StatsHandle {
    pub(crate) fn new(
        pool: WorkerPool,
        splitter: Box<dyn Splitter>,
        deadline: Duration,
        statistics: ServiceStatistics,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                pool,
                splitter,
                registry: JobRegistry::default(),
                deadline,
                statistics,
            }),
        }
    }

    /// Submits a request, returning a handle to its pending reply.
    ///
    /// The request is completed within the configured default deadline.
    pub fn submit(&self, text: &str) -> ReplyHandle {
        self.submit_with_deadline(text, self.inner.deadline)
    }

    /// Submits a request which must complete within `deadline`.
    ///
    /// A request without any tokens is answered with [JobError::EmptyRequest]
    /// straight away, no aggregation job is started for it. A deadline too far
    /// out to be represented is capped at thirty years.
    pub fn submit_with_deadline(&self, text: &str, deadline: Duration) -> ReplyHandle {
        self.inner
            .statistics
            .num_requests
            .fetch_add(1, Ordering::Relaxed);

        let (reply_tx, reply_rx) = oneshot::channel();
        let values = self.inner.splitter.split(text);

        if values.is_empty() {
            self.inner
                .statistics
                .num_empty_requests
                .fetch_add(1, Ordering::Relaxed);
            let _ = reply_tx.send(StatsReply::Failed(JobError::EmptyRequest));
            return ReplyHandle {
                request_id: None,
                rx: reply_rx,
            };
        }

        let request_id = self.inner.registry.next_request_id();
        let tokens = values
            .into_iter()
            .enumerate()
            .map(|(index, value)| Token::new(request_id, index, value))
            .collect::<Vec<_>>();

        let started = Instant::now();
        let expires_at = started
            .checked_add(deadline)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let job = AggregationJob::new(request_id, tokens.len(), expires_at, reply_tx);
        let (control_tx, control_rx) = flume::bounded(1);

        self.inner.registry.register(
            request_id,
            JobEntry {
                control: control_tx,
                started,
                expected: tokens.len(),
            },
        );
        self.inner
            .statistics
            .num_live_jobs
            .fetch_add(1, Ordering::Relaxed);

        let guard = JobGuard {
            request_id,
            inner: self.inner.clone(),
        };
        let pool = self.inner.pool.clone();
        let statistics = self.inner.statistics.clone();

        trace!(
            request_id = request_id,
            num_tokens = tokens.len(),
            deadline = ?deadline,
            "Starting aggregation job."
        );

        tokio::spawn(async move {
            let _guard = guard;
            run_aggregator(job, tokens, pool, control_rx, statistics).await;
        });

        ReplyHandle {
            request_id: Some(request_id),
            rx: reply_rx,
        }
    }

    /// Submits a request and waits for its reply.
    pub async fn request(&self, text: &str) -> StatsReply {
        self.submit(text).recv().await
    }

    /// Submits every request concurrently, returning the replies in order.
    pub async fn request_many<I, S>(&self, texts: I) -> Vec<StatsReply>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let handles = texts
            .into_iter()
            .map(|text| self.submit(text.as_ref()))
            .collect::<Vec<_>>();

        future::join_all(handles.into_iter().map(ReplyHandle::recv)).await
    }

    /// Completes the in-flight job with the results it has collected so far.
    ///
    /// Returns `false` if the job is not live anymore.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        let jobs = self.inner.registry.jobs.lock();
        match jobs.get(&request_id) {
            Some(entry) => {
                // A full control channel means the job is already cancelled.
                let _ = entry.control.try_send(Control::Cancel);
                true
            },
            None => false,
        }
    }

    #[inline]
    /// The number of aggregation jobs currently in flight.
    pub fn num_live_jobs(&self) -> usize {
        self.inner.registry.len()
    }

    #[inline]
    pub fn statistics(&self) -> ServiceStatistics {
        self.inner.statistics.clone()
    }

    #[inline]
    /// The worker pool requests are routed through.
    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }
}
