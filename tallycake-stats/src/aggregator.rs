use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{JobError, TokenError};
use crate::messages::{PartialResult, RequestId, Statistic, StatsReply, Token};
use crate::pool::WorkerPool;
use crate::statistics::ServiceStatistics;

/// Out of band messages for a running aggregation job.
pub(crate) enum Control {
    /// Completes the job immediately with whatever it has collected.
    Cancel,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum MergeOutcome {
    /// The result was recorded.
    Accepted,
    /// The token was already accounted for.
    Duplicate,
    /// The result belongs to another request or an unknown token.
    Rejected,
    /// The job has already completed.
    Discarded,
}

/// The accumulator of a single request.
///
/// Owned by exactly one aggregator task and terminal once completed.
pub(crate) struct AggregationJob {
    request_id: RequestId,
    expected: usize,
    deadline: Instant,
    results: BTreeMap<usize, Result<f64, TokenError>>,
    reply: Option<oneshot::Sender<StatsReply>>,
}

impl AggregationJob {
    pub(crate) fn new(
        request_id: RequestId,
        expected: usize,
        deadline: Instant,
        reply: oneshot::Sender<StatsReply>,
    ) -> Self {
        Self {
            request_id,
            expected,
            deadline,
            results: BTreeMap::new(),
            reply: Some(reply),
        }
    }

    pub(crate) fn merge(&mut self, result: PartialResult) -> MergeOutcome {
        if self.is_completed() {
            return MergeOutcome::Discarded;
        }

        if result.request_id != self.request_id || result.token_index >= self.expected {
            return MergeOutcome::Rejected;
        }

        if self.results.contains_key(&result.token_index) {
            return MergeOutcome::Duplicate;
        }

        let outcome = result.outcome.map(|computed| computed.value);
        self.results.insert(result.token_index, outcome);
        MergeOutcome::Accepted
    }

    #[inline]
    /// Returns if every token has been accounted for.
    pub(crate) fn is_collected(&self) -> bool {
        self.results.len() == self.expected
    }

    #[inline]
    pub(crate) fn is_completed(&self) -> bool {
        self.reply.is_none()
    }

    /// Builds the reply over the results collected so far.
    pub(crate) fn statistic(&self) -> StatsReply {
        let mut sum = 0.0;
        let mut received = 0;
        let mut failures = 0;

        // Summed in token order so the mean does not depend on arrival order.
        for outcome in self.results.values() {
            match outcome {
                Ok(value) => {
                    sum += value;
                    received += 1;
                },
                Err(_) => failures += 1,
            }
        }

        if received == 0 {
            return StatsReply::Failed(JobError::AggregationTimeout {
                expected: self.expected,
                failed: failures,
            });
        }

        let stat = Statistic {
            mean: sum / received as f64,
            received,
            expected: self.expected,
            failures,
        };

        if stat.is_partial() {
            StatsReply::Partial(stat)
        } else {
            StatsReply::Complete(stat)
        }
    }

    /// Sends the reply to the client.
    ///
    /// Only the first call has an effect, later calls return `None`.
    pub(crate) fn complete(&mut self) -> Option<StatsReply> {
        let reply = self.reply.take()?;
        let stats = self.statistic();

        // The client may have stopped waiting.
        let _ = reply.send(stats.clone());
        Some(stats)
    }
}

/// Runs an aggregation job to completion.
///
/// Routes every token through the pool and merges the partial results until
/// every token is accounted for, the deadline passes or the job is cancelled.
#[instrument(name = "aggregation-job", skip_all, fields(request_id = job.request_id))]
pub(crate) async fn run_aggregator(
    mut job: AggregationJob,
    tokens: Vec<Token>,
    pool: WorkerPool,
    control: flume::Receiver<Control>,
    statistics: ServiceStatistics,
) {
    let started = Instant::now();
    let deadline = job.deadline;
    let (results_tx, results_rx) = flume::unbounded();

    let mut cancel_open = true;
    let mut cancelled = false;
    {
        let dispatch = async {
            for token in tokens {
                if let Err(error) = pool.dispatch(token.clone(), &results_tx).await {
                    statistics
                        .num_routing_failures
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(
                        token_index = token.index(),
                        error = %error,
                        "Failed to route token."
                    );
                    job.merge(PartialResult::failure(&token, TokenError::from(error)));
                }
            }
        };
        tokio::pin!(dispatch);

        // A full mailbox stalls routing, cancels and the deadline still apply.
        loop {
            tokio::select! {
                biased;

                msg = control.recv_async(), if cancel_open => match msg {
                    Ok(Control::Cancel) => {
                        debug!("Job has been cancelled while routing tokens.");
                        cancelled = true;
                        break;
                    },
                    Err(_) => cancel_open = false,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    warn!("Deadline passed before every token could be routed.");
                    break;
                },
                _ = &mut dispatch => break,
            }
        }
    }

    // Only the workers hold a sender from here on.
    drop(results_tx);

    while !cancelled && !job.is_collected() {
        tokio::select! {
            biased;

            result = results_rx.recv_async() => match result {
                Ok(result) => {
                    if job.merge(result) == MergeOutcome::Duplicate {
                        debug!("Ignoring duplicate partial result.");
                    }
                },
                Err(_) => {
                    debug!("Every routed token has been processed.");
                    break;
                },
            },
            msg = control.recv_async(), if cancel_open => match msg {
                Ok(Control::Cancel) => {
                    debug!("Job has been cancelled.");
                    break;
                },
                Err(_) => cancel_open = false,
            },
            _ = tokio::time::sleep_until(deadline) => {
                debug!("Job deadline has passed.");
                break;
            },
        }
    }

    let reply = match job.complete() {
        Some(reply) => reply,
        None => return,
    };

    let counter = match &reply {
        StatsReply::Complete(_) => &statistics.num_complete,
        StatsReply::Partial(_) => &statistics.num_partial,
        StatsReply::Failed(_) => &statistics.num_timeouts,
    };
    counter.fetch_add(1, Ordering::Relaxed);

    debug!(
        elapsed = ?started.elapsed(),
        expected = job.expected,
        collected = job.results.len(),
        reply = ?reply,
        "Aggregation job completed."
    );
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::messages::Computed;

    fn job(expected: usize) -> (AggregationJob, oneshot::Receiver<StatsReply>) {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + Duration::from_secs(5);
        (AggregationJob::new(1, expected, deadline, tx), rx)
    }

    fn success(index: usize, value: f64) -> PartialResult {
        PartialResult {
            request_id: 1,
            token_index: index,
            outcome: Ok(Computed {
                value,
                cached: false,
            }),
        }
    }

    #[test]
    fn test_statistic_is_permutation_invariant() {
        let values = [0.1, 0.2, 0.3, 1e16, -1e16, 7.0];
        let orders: [[usize; 6]; 3] =
            [[0, 1, 2, 3, 4, 5], [5, 4, 3, 2, 1, 0], [3, 0, 5, 1, 4, 2]];

        let mut means = Vec::new();
        for order in orders {
            let (mut job, _rx) = job(values.len());
            for index in order {
                assert_eq!(job.merge(success(index, values[index])), MergeOutcome::Accepted);
            }
            assert!(job.is_collected());
            means.push(job.statistic().mean().expect("Mean should be present"));
        }

        assert!(means.windows(2).all(|pair| pair[0].to_bits() == pair[1].to_bits()));
    }

    #[test]
    fn test_routing_failures_make_reply_partial() {
        let (mut job, _rx) = job(5);
        job.merge(success(0, 1.0));
        job.merge(PartialResult::failed(1, 1, TokenError::RoutingUnavailable));
        job.merge(success(2, 2.0));
        job.merge(PartialResult::failed(1, 3, TokenError::RoutingUnavailable));
        job.merge(success(4, 3.0));
        assert!(job.is_collected());

        let expected = Statistic {
            mean: 2.0,
            received: 3,
            expected: 5,
            failures: 2,
        };
        assert_eq!(job.statistic(), StatsReply::Partial(expected));
    }

    #[test]
    fn test_zero_successes_is_timeout() {
        let (mut job, _rx) = job(3);
        assert_eq!(
            job.statistic(),
            StatsReply::Failed(JobError::AggregationTimeout {
                expected: 3,
                failed: 0
            }),
        );

        job.merge(PartialResult::failed(1, 0, TokenError::WorkerLost));
        assert_eq!(
            job.statistic(),
            StatsReply::Failed(JobError::AggregationTimeout {
                expected: 3,
                failed: 1
            }),
        );
    }

    #[test]
    fn test_merge_outcomes() {
        let (mut job, _rx) = job(2);
        assert_eq!(job.merge(success(0, 1.0)), MergeOutcome::Accepted);
        assert_eq!(job.merge(success(0, 5.0)), MergeOutcome::Duplicate);
        assert_eq!(job.merge(success(2, 1.0)), MergeOutcome::Rejected);

        let mut foreign = success(1, 1.0);
        foreign.request_id = 2;
        assert_eq!(job.merge(foreign), MergeOutcome::Rejected);
        assert_eq!(job.statistic().mean(), Some(1.0), "Duplicate must not be counted.");
    }

    #[tokio::test]
    async fn test_job_replies_exactly_once() {
        let (mut job, rx) = job(2);
        job.merge(success(0, 4.0));

        let first = job.complete().expect("First completion should reply");
        assert!(first.is_partial());
        assert!(job.complete().is_none());
        assert_eq!(job.merge(success(1, 2.0)), MergeOutcome::Discarded);

        let received = rx.await.expect("Reply should be sent");
        assert_eq!(received, first);
    }
}
