// src/sync/mod.rs
//! # Sync Engine
//! One scan cycle: collect -> dedupe -> filter by cursor -> order -> cap ->
//! deliver -> advance cursor.
//!
//! Provider and consumer failures are soft: they are logged, counted and
//! reported, but never abort the cycle. Only the cursor store (read or write)
//! and cancellation end a cycle early. The cursor is touched once at the end,
//! after every delivery attempt has finished, so a cancelled cycle leaves it
//! where it was.

pub mod fanout;
pub mod merge;
pub mod scheduler;
pub mod types;

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::cursor::CursorStore;
use crate::error::{ConsumerFailure, CycleError, DeliveryErrors, ProviderFailure};
use crate::post::{Post, PostKey};
pub use types::{Consumer, Provider};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("sync_cycles_total", "Scan cycles started.");
        describe_counter!(
            "sync_cycle_errors_total",
            "Cycles aborted by cursor store failure, timeout or shutdown."
        );
        describe_counter!("sync_provider_errors_total", "Provider collect failures.");
        describe_counter!("sync_consumer_errors_total", "Consumer delivery failures.");
        describe_counter!(
            "sync_posts_collected_total",
            "Posts collected after dedupe."
        );
        describe_counter!("sync_posts_delivered_total", "Posts handed to consumers.");
        describe_counter!(
            "sync_posts_capped_total",
            "Fresh posts dropped by the batch cap."
        );
        describe_gauge!("sync_cursor_ts", "Current cursor (unix seconds).");
        describe_gauge!("sync_last_cycle_ts", "Unix ts when the last cycle finished.");
        describe_histogram!("sync_cycle_ms", "Cycle duration in milliseconds.");
    });
}

/// What one cycle did. Returned even when some consumers failed; see
/// [`CycleReport::delivery_error`].
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Posts left after merging and deduplicating provider output.
    pub collected: usize,
    pub provider_failures: Vec<ProviderFailure>,
    pub cursor_before: u64,
    /// Posts newer than `cursor_before`.
    pub fresh: usize,
    /// Delivered identities, in delivery order (newest first).
    pub delivered: Vec<PostKey>,
    pub capped: usize,
    /// `Some` only when the cursor was written this cycle.
    pub cursor_after: Option<u64>,
    pub consumer_failures: Vec<ConsumerFailure>,
}

impl CycleReport {
    /// True when nothing was fresh and no side effect happened.
    pub fn is_idle(&self) -> bool {
        self.fresh == 0
    }

    /// All consumer failures of this cycle joined into one error.
    pub fn delivery_error(&self) -> Option<DeliveryErrors> {
        if self.consumer_failures.is_empty() {
            return None;
        }
        Some(DeliveryErrors(
            self.consumer_failures
                .iter()
                .map(|f| ConsumerFailure {
                    consumer: f.consumer.clone(),
                    error: anyhow::anyhow!("{:#}", f.error),
                })
                .collect(),
        ))
    }
}

/// Fixed provider/consumer sets plus the cursor store, assembled once at startup.
pub struct SyncEngine {
    providers: Vec<Arc<dyn Provider>>,
    consumers: Vec<Arc<dyn Consumer>>,
    cursor: Arc<dyn CursorStore>,
    max_batch_size: usize,
}

impl SyncEngine {
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        consumers: Vec<Arc<dyn Consumer>>,
        cursor: Arc<dyn CursorStore>,
    ) -> Self {
        Self {
            providers,
            consumers,
            cursor,
            max_batch_size: 0,
        }
    }

    /// `0` means unlimited.
    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max;
        self
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub fn consumers(&self) -> &[Arc<dyn Consumer>] {
        &self.consumers
    }

    /// Run exactly one scan cycle.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<CycleReport, CycleError> {
        ensure_metrics_described();
        counter!("sync_cycles_total").increment(1);
        let t0 = Instant::now();

        let res = self.cycle(cancel).await;

        histogram!("sync_cycle_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        gauge!("sync_last_cycle_ts").set(chrono::Utc::now().timestamp() as f64);
        if res.is_err() {
            counter!("sync_cycle_errors_total").increment(1);
        }
        res
    }

    async fn cycle(&self, cancel: &CancellationToken) -> Result<CycleReport, CycleError> {
        let collected = fanout::collect_all(&self.providers, cancel).await?;

        let (merged, dups) = merge::dedupe(collected.posts);
        counter!("sync_posts_collected_total").increment(merged.len() as u64);
        let mut report = CycleReport {
            collected: merged.len(),
            provider_failures: collected.failures,
            ..Default::default()
        };

        let cursor_before = self
            .cursor
            .get_cursor()
            .await
            .map_err(CycleError::CursorRead)?
            .unwrap_or(0);
        report.cursor_before = cursor_before;
        gauge!("sync_cursor_ts").set(cursor_before as f64);

        let mut fresh = merge::newer_than(merged, cursor_before);
        report.fresh = fresh.len();
        let Some(newest) = merge::newest_timestamp(&fresh) else {
            tracing::debug!(
                collected = report.collected,
                duplicates = dups,
                cursor = cursor_before,
                "no new posts"
            );
            return Ok(report);
        };

        merge::order_newest_first(&mut fresh);
        report.capped = merge::cap_batch(&mut fresh, self.max_batch_size);
        if report.capped > 0 {
            tracing::info!(
                dropped = report.capped,
                max = self.max_batch_size,
                "batch capped; older posts skipped"
            );
            counter!("sync_posts_capped_total").increment(report.capped as u64);
        }
        report.delivered = fresh.iter().map(Post::key).collect();

        let batch: Arc<[Post]> = fresh.into();
        report.consumer_failures = fanout::deliver_all(&self.consumers, batch, cancel).await?;
        counter!("sync_posts_delivered_total").increment(report.delivered.len() as u64);

        // Newest of the pre-cap set, so capped-away posts are not redelivered.
        let next = newest.max(cursor_before);
        self.cursor
            .set_cursor(next)
            .await
            .map_err(|source| CycleError::CursorWrite {
                cursor: next,
                source,
            })?;
        report.cursor_after = Some(next);
        gauge!("sync_cursor_ts").set(next as f64);

        tracing::info!(
            delivered = report.delivered.len(),
            fresh = report.fresh,
            consumer_errors = report.consumer_failures.len(),
            cursor = next,
            "cycle delivered"
        );
        Ok(report)
    }
}
