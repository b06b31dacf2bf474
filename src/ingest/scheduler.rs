// src/ingest/scheduler.rs
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::SyncError;
use crate::sync::{SyncRunner, Trigger};

#[derive(Clone, Debug)]
pub struct SyncSchedulerCfg {
    pub interval_secs: u64,
    pub city: String,
}

/// Spawn the periodic trigger. Each tick asks the runner for a run; a tick
/// that lands while another run is in flight is skipped, not queued.
/// Returns `None` when `interval_secs` is 0.
pub fn spawn_sync_scheduler(
    cfg: SyncSchedulerCfg,
    runner: Arc<SyncRunner>,
) -> Option<JoinHandle<()>> {
    if cfg.interval_secs == 0 {
        tracing::info!(target: "sync", "periodic sync disabled");
        return None;
    }
    Some(tokio::spawn(async move {
        let period = std::time::Duration::from_secs(cfg.interval_secs);
        // First tick one full period after start, like a browser interval.
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match runner.run_once(&cfg.city, Trigger::Scheduled).await {
                Ok(_) => {}
                Err(SyncError::Busy) => {
                    tracing::debug!(target: "sync", "scheduled tick skipped: run in flight");
                }
                // Already logged by the runner; the next tick is the retry.
                Err(_) => {}
            }
        }
    }))
}
