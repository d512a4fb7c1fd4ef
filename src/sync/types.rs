// src/sync/types.rs
use anyhow::Result;

use crate::post::Post;

/// A connector producing the currently visible posts of one source.
/// Retries, backoff and rate limiting are the provider's own business.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    async fn collect(&self) -> Result<Vec<Post>>;
    fn name(&self) -> &str;
}

/// A sink delivering an ordered batch to one notification channel.
///
/// Partial internal failures (one unreachable recipient out of many) should be
/// absorbed; return an error only when the whole push failed.
#[async_trait::async_trait]
pub trait Consumer: Send + Sync {
    async fn push_batch(&self, posts: &[Post]) -> Result<()>;
    fn name(&self) -> &str;
}
