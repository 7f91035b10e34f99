use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type Counter = AtomicU64;

#[derive(Debug, Clone, Default)]
/// Live metrics around the statistics service.
pub struct ServiceStatistics(Arc<ServiceStatisticsInner>);

impl Deref for ServiceStatistics {
    type Target = ServiceStatisticsInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Default)]
pub struct ServiceStatisticsInner {
    /// The number of requests submitted to the dispatcher.
    pub(crate) num_requests: Counter,
    /// The number of requests which contained no tokens.
    pub(crate) num_empty_requests: Counter,
    /// The number of jobs which completed with every token resolved.
    pub(crate) num_complete: Counter,
    /// The number of jobs which completed with a degraded statistic.
    pub(crate) num_partial: Counter,
    /// The number of jobs which completed without any results.
    pub(crate) num_timeouts: Counter,
    /// The number of aggregation jobs currently in flight.
    pub(crate) num_live_jobs: Counter,
    /// The number of tokens served from a worker's cache.
    pub(crate) num_cache_hits: Counter,
    /// The number of tokens a worker had to compute.
    pub(crate) num_cache_misses: Counter,
    /// The number of tokens which could not be routed to any worker.
    pub(crate) num_routing_failures: Counter,
    /// The number of tokens whose computation failed.
    pub(crate) num_compute_failures: Counter,
    /// The number of times a crashed worker has been replaced.
    pub(crate) num_worker_restarts: Counter,
}

impl ServiceStatisticsInner {
    /// The number of requests submitted to the dispatcher.
    pub fn num_requests(&self) -> u64 {
        self.num_requests.load(Ordering::Relaxed)
    }

    /// The number of requests which contained no tokens.
    pub fn num_empty_requests(&self) -> u64 {
        self.num_empty_requests.load(Ordering::Relaxed)
    }

    /// The number of jobs which completed with every token resolved.
    pub fn num_complete(&self) -> u64 {
        self.num_complete.load(Ordering::Relaxed)
    }

    /// The number of jobs which completed with a degraded statistic.
    pub fn num_partial(&self) -> u64 {
        self.num_partial.load(Ordering::Relaxed)
    }

    /// The number of jobs which completed without any results.
    pub fn num_timeouts(&self) -> u64 {
        self.num_timeouts.load(Ordering::Relaxed)
    }

    /// The number of aggregation jobs currently in flight.
    pub fn num_live_jobs(&self) -> u64 {
        self.num_live_jobs.load(Ordering::Relaxed)
    }

    /// The number of tokens served from a worker's cache.
    pub fn num_cache_hits(&self) -> u64 {
        self.num_cache_hits.load(Ordering::Relaxed)
    }

    /// The number of tokens a worker had to compute.
    pub fn num_cache_misses(&self) -> u64 {
        self.num_cache_misses.load(Ordering::Relaxed)
    }

    /// The number of tokens which could not be routed to any worker.
    pub fn num_routing_failures(&self) -> u64 {
        self.num_routing_failures.load(Ordering::Relaxed)
    }

    /// The number of tokens whose computation failed.
    pub fn num_compute_failures(&self) -> u64 {
        self.num_compute_failures.load(Ordering::Relaxed)
    }

    /// The number of times a crashed worker has been replaced.
    pub fn num_worker_restarts(&self) -> u64 {
        self.num_worker_restarts.load(Ordering::Relaxed)
    }
}
