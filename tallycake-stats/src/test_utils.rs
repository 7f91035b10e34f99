use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::TokenCompute;

#[derive(Debug, thiserror::Error)]
#[error("Scripted failure for token {0:?}.")]
pub struct ScriptedFailure(pub String);

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    Fail,
    Panic,
    Delay(Duration),
}

#[derive(Debug, Default)]
/// A word length computation with scripted misbehaviour for chosen tokens.
///
/// Every invocation is counted, which allows tests to observe cache hits.
pub struct ScriptedCompute {
    behaviours: HashMap<String, Behaviour>,
    default_delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedCompute {
    /// Fails the computation for the given token.
    pub fn fail_on(mut self, token: &str) -> Self {
        self.behaviours.insert(token.to_string(), Behaviour::Fail);
        self
    }

    /// Panics while computing the given token.
    pub fn panic_on(mut self, token: &str) -> Self {
        self.behaviours.insert(token.to_string(), Behaviour::Panic);
        self
    }

    /// Delays the computation for the given token.
    pub fn delay_on(mut self, token: &str, delay: Duration) -> Self {
        self.behaviours
            .insert(token.to_string(), Behaviour::Delay(delay));
        self
    }

    /// Delays the computation of every token without an explicit behaviour.
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = Some(delay);
        self
    }

    /// The number of times `compute` has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TokenCompute for ScriptedCompute {
    type Error = ScriptedFailure;

    async fn compute(&self, token: &str) -> Result<f64, Self::Error> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        match self.behaviours.get(token).copied() {
            Some(Behaviour::Fail) => return Err(ScriptedFailure(token.to_string())),
            Some(Behaviour::Panic) => panic!("scripted panic for token {token:?}"),
            Some(Behaviour::Delay(delay)) => tokio::time::sleep(delay).await,
            None => {
                if let Some(delay) = self.default_delay {
                    tokio::time::sleep(delay).await;
                }
            },
        }

        Ok(token.chars().count() as f64)
    }
}
