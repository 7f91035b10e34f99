use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("The cluster did not reach the expected state within {0:?}.")]
    /// The membership did not converge before the timeout elapsed.
    Timeout(Duration),

    #[error("The membership tracker has stopped.")]
    /// The tracker task is no longer running, either due to a shutdown
    /// or the membership source ending.
    TrackerStopped,
}

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("No workers are available to route the token to.")]
    /// The routing table contains no `Up` targets hosting a worker.
    NoWorkersAvailable,
}
