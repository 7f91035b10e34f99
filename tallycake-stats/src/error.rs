use tallycake_node::RoutingError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// The reason a single token has no result.
///
/// A token error never aborts the job, it is recorded as a missing result.
pub enum TokenError {
    #[error("No worker was available to process the token.")]
    RoutingUnavailable,

    #[error("Failed to compute the result of the token: {0}")]
    ComputationFailure(String),

    #[error("The worker processing the token was lost before replying.")]
    WorkerLost,
}

impl From<RoutingError> for TokenError {
    fn from(error: RoutingError) -> Self {
        match error {
            RoutingError::NoWorkersAvailable => Self::RoutingUnavailable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// The reason a request could not produce a statistic.
pub enum JobError {
    #[error("The request contains no tokens to aggregate.")]
    EmptyRequest,

    #[error(
        "No results were collected for any of the {expected} tokens before the job \
        completed ({failed} tokens reported a failure)."
    )]
    AggregationTimeout { expected: usize, failed: usize },

    #[error("The aggregation job stopped before replying.")]
    /// The aggregator exited without replying, e.g. the runtime shut down.
    Aborted,
}

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("Invalid service configuration: {0}")]
    InvalidConfig(&'static str),
}
