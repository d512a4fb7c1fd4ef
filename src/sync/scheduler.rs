// src/sync/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::SyncEngine;
use crate::error::CycleError;

#[derive(Clone, Copy, Debug)]
pub struct SchedulerCfg {
    pub interval: Duration,
    /// Per-cycle deadline; `None` uses the interval.
    pub cycle_timeout: Option<Duration>,
}

impl SyncEngine {
    /// Run cycles on a fixed period until `cancel` fires. The first cycle runs
    /// immediately. Cycles never overlap: a slow cycle delays the next tick.
    pub async fn run_forever(&self, cfg: SchedulerCfg, cancel: &CancellationToken) {
        let timeout = cfg.cycle_timeout.unwrap_or(cfg.interval);
        // tokio panics on a zero period
        let mut ticker = tokio::time::interval(cfg.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = cfg.interval.as_secs(),
            providers = self.providers().len(),
            consumers = self.consumers().len(),
            "scan loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let cycle = cancel.child_token();
            let watchdog = {
                let cycle = cycle.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    cycle.cancel();
                })
            };
            let res = self.run_once(&cycle).await;
            watchdog.abort();

            match res {
                Ok(report) => {
                    if let Some(err) = report.delivery_error() {
                        tracing::warn!(error = %err, "cycle finished with delivery errors");
                    }
                }
                Err(CycleError::Cancelled) if cancel.is_cancelled() => break,
                Err(CycleError::Cancelled) => {
                    tracing::warn!(timeout_secs = timeout.as_secs(), "cycle timed out");
                }
                Err(e) => tracing::error!(error = %e, "scan cycle failed"),
            }
        }

        tracing::info!("scan loop stopped");
    }
}

/// Spawn the scan loop on the runtime. Cancel `cancel` to stop it.
pub fn spawn_scheduler(
    engine: Arc<SyncEngine>,
    cfg: SchedulerCfg,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move { engine.run_forever(cfg, &cancel).await })
}
