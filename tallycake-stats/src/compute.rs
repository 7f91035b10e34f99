use std::convert::Infallible;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;

#[async_trait]
/// The business logic computing the result for a single token.
///
/// Implementations should be deterministic, a worker caches the result of
/// every token it has computed and will never call `compute` for that token
/// again while the cache holds it.
///
/// The computation may perform I/O, each worker processes one token at a time
/// but different workers run independently of one another.
pub trait TokenCompute: Send + Sync + 'static {
    type Error: Error + Send + Sync + 'static;

    /// Computes the numeric result for the given token.
    async fn compute(&self, token: &str) -> Result<f64, Self::Error>;
}

#[async_trait]
impl<C: TokenCompute> TokenCompute for Arc<C> {
    type Error = C::Error;

    async fn compute(&self, token: &str) -> Result<f64, Self::Error> {
        (**self).compute(token).await
    }
}

#[derive(Debug, Default, Copy, Clone)]
/// Computes the length of a word in characters.
pub struct WordLength;

#[async_trait]
impl TokenCompute for WordLength {
    type Error = Infallible;

    async fn compute(&self, token: &str) -> Result<f64, Self::Error> {
        Ok(token.chars().count() as f64)
    }
}

/// Decomposes the text of a request into the tokens which are fanned out.
pub trait Splitter: Send + Sync + 'static {
    /// Splits the text into its tokens, in order.
    ///
    /// Returning no tokens short-circuits the request with an
    /// [EmptyRequest](crate::JobError::EmptyRequest) reply.
    fn split(&self, text: &str) -> Vec<String>;
}

#[derive(Debug, Default, Copy, Clone)]
/// Splits text into words on any unicode whitespace.
pub struct WhitespaceSplitter;

impl Splitter for WhitespaceSplitter {
    fn split(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(ToOwned::to_owned).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_word_length_counts_chars() {
        assert_eq!(WordLength.compute("ccc").await.unwrap(), 3.0);
        assert_eq!(WordLength.compute("").await.unwrap(), 0.0);
        assert_eq!(WordLength.compute("héllo").await.unwrap(), 5.0);
    }

    #[test]
    fn test_whitespace_splitter() {
        let splitter = WhitespaceSplitter;
        assert_eq!(splitter.split("a bb ccc"), vec!["a", "bb", "ccc"]);
        assert_eq!(splitter.split("  a \t bb\n"), vec!["a", "bb"]);
        assert!(splitter.split("").is_empty());
        assert!(splitter.split(" \t\n ").is_empty());
    }
}
