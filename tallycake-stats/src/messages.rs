use crate::error::{JobError, TokenError};

/// The unique ID of a request within a service.
pub type RequestId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
/// One indivisible unit of decomposed client work.
pub struct Token {
    request_id: RequestId,
    index: usize,
    value: String,
}

impl Token {
    pub fn new(request_id: RequestId, index: usize, value: impl Into<String>) -> Self {
        Self {
            request_id,
            index,
            value: value.into(),
        }
    }

    #[inline]
    /// The request the token belongs to.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    #[inline]
    /// The position of the token within its request, identifying the token.
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
/// The value a worker produced for a token.
pub struct Computed {
    pub value: f64,
    /// If the value was served from the worker's cache.
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq)]
/// The outcome of a single token.
pub struct PartialResult {
    pub request_id: RequestId,
    pub token_index: usize,
    pub outcome: Result<Computed, TokenError>,
}

impl PartialResult {
    pub fn success(token: &Token, computed: Computed) -> Self {
        Self {
            request_id: token.request_id,
            token_index: token.index,
            outcome: Ok(computed),
        }
    }

    pub fn failure(token: &Token, error: TokenError) -> Self {
        Self::failed(token.request_id, token.index, error)
    }

    pub(crate) fn failed(request_id: RequestId, token_index: usize, error: TokenError) -> Self {
        Self {
            request_id,
            token_index,
            outcome: Err(error),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
/// The arithmetic mean over the results a job collected.
pub struct Statistic {
    pub mean: f64,
    /// The number of tokens which produced a value.
    pub received: usize,
    /// The number of tokens the request was split into.
    pub expected: usize,
    /// The number of tokens which reported an explicit failure.
    pub failures: usize,
}

impl Statistic {
    #[inline]
    /// Returns if the statistic was computed from an incomplete set of results.
    pub fn is_partial(&self) -> bool {
        self.received < self.expected
    }

    #[inline]
    /// The number of tokens which never reported back.
    pub fn missing(&self) -> usize {
        self.expected - self.received - self.failures
    }
}

#[derive(Debug, Clone, PartialEq)]
/// The single reply a client receives for a request.
pub enum StatsReply {
    /// Every token produced a value before the deadline.
    Complete(Statistic),
    /// A degraded answer computed from the subset of tokens which produced a value.
    Partial(Statistic),
    /// No statistic could be produced.
    Failed(JobError),
}

impl StatsReply {
    /// The statistic of the reply, complete or partial.
    pub fn statistic(&self) -> Option<&Statistic> {
        match self {
            Self::Complete(stat) | Self::Partial(stat) => Some(stat),
            Self::Failed(_) => None,
        }
    }

    pub fn mean(&self) -> Option<f64> {
        self.statistic().map(|stat| stat.mean)
    }

    pub fn error(&self) -> Option<&JobError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    #[inline]
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Partial(_))
    }
}
