// src/sync/fanout.rs
//! Concurrent calls into providers and consumers.
//!
//! Every call runs in its own task, so an error or a panic stays with the
//! collaborator that caused it. Results are read back in configuration order,
//! which keeps the merged stream deterministic whatever the completion order.

use std::sync::Arc;

use anyhow::anyhow;
use futures::future::join_all;
use metrics::counter;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::error::{ConsumerFailure, CycleError, ProviderFailure};
use crate::post::Post;
use crate::sync::types::{Consumer, Provider};

/// Aborts still-running tasks when the fan-out is abandoned (cancellation or
/// the enclosing future being dropped).
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for h in &self.0 {
            h.abort();
        }
    }
}

async fn join_in_order<T: Send + 'static>(
    handles: Vec<JoinHandle<anyhow::Result<T>>>,
    cancel: &CancellationToken,
) -> Result<Vec<anyhow::Result<T>>, CycleError> {
    let _guard = AbortOnDrop(handles.iter().map(JoinHandle::abort_handle).collect());
    let joined = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(CycleError::Cancelled),
        res = join_all(handles) => res,
    };
    Ok(joined
        .into_iter()
        .map(|r| r.unwrap_or_else(|e| Err(anyhow!("task failed: {e}"))))
        .collect())
}

#[derive(Debug, Default)]
pub struct Collected {
    pub posts: Vec<Post>,
    pub failures: Vec<ProviderFailure>,
}

/// Union of all provider outputs, in provider order. A failing provider
/// contributes nothing.
pub async fn collect_all(
    providers: &[Arc<dyn Provider>],
    cancel: &CancellationToken,
) -> Result<Collected, CycleError> {
    let names: Vec<String> = providers.iter().map(|p| p.name().to_string()).collect();
    let handles = providers
        .iter()
        .map(|p| {
            let p = Arc::clone(p);
            tokio::spawn(async move { p.collect().await })
        })
        .collect();

    let results = join_in_order(handles, cancel).await?;

    let mut out = Collected::default();
    for (name, res) in names.into_iter().zip(results) {
        match res {
            Ok(mut posts) => {
                tracing::debug!(provider = %name, count = posts.len(), "provider collected");
                out.posts.append(&mut posts);
            }
            Err(e) => {
                tracing::warn!(error = ?e, provider = %name, "provider error");
                counter!("sync_provider_errors_total", "provider" => name.clone()).increment(1);
                out.failures.push(ProviderFailure {
                    provider: name,
                    error: e,
                });
            }
        }
    }
    Ok(out)
}

/// Hand the same batch to every consumer. Returns the consumers that failed.
pub async fn deliver_all(
    consumers: &[Arc<dyn Consumer>],
    batch: Arc<[Post]>,
    cancel: &CancellationToken,
) -> Result<Vec<ConsumerFailure>, CycleError> {
    let names: Vec<String> = consumers.iter().map(|c| c.name().to_string()).collect();
    let handles = consumers
        .iter()
        .map(|c| {
            let c = Arc::clone(c);
            let batch = Arc::clone(&batch);
            tokio::spawn(async move { c.push_batch(&batch).await })
        })
        .collect();

    let results = join_in_order(handles, cancel).await?;

    let mut failures = Vec::new();
    for (name, res) in names.into_iter().zip(results) {
        match res {
            Ok(()) => tracing::debug!(consumer = %name, count = batch.len(), "batch delivered"),
            Err(e) => {
                tracing::warn!(error = ?e, consumer = %name, "consumer error");
                counter!("sync_consumer_errors_total", "consumer" => name.clone()).increment(1);
                failures.push(ConsumerFailure {
                    consumer: name,
                    error: e,
                });
            }
        }
    }
    Ok(failures)
}
