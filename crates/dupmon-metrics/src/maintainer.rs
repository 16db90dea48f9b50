//! Retention maintainer: periodically prunes stale window entries.
//!
//! Ticks never queue: a tick that finds the registry or a series busy skips
//! that work, and the next tick prunes whatever is stale by then.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use crate::engine::{MetricsEngine, PruneStats};
use crate::error::{EngineError, EngineResult};

/// Background task that keeps every series' window current.
pub struct RetentionMaintainer {
    engine: Arc<MetricsEngine>,
    /// Time between sweeps.
    interval: Duration,
}

impl RetentionMaintainer {
    /// Create a maintainer sweeping `engine` every `interval`.
    pub fn new(engine: Arc<MetricsEngine>, interval: Duration) -> EngineResult<Self> {
        if interval.is_zero() {
            return Err(EngineError::InvalidDuration(
                "maintenance interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self { engine, interval })
    }

    /// Sweep once as of `now`. Returns `None` if the tick was skipped.
    pub fn sweep(&self, now: DateTime<Utc>) -> Option<PruneStats> {
        let Some(stats) = self.engine.try_prune(now) else {
            debug!("registry busy, skipping retention tick");
            return None;
        };
        if stats.skipped > 0 {
            debug!(skipped = stats.skipped, "busy series left for the next tick");
        }
        if stats.removed > 0 {
            trace!(
                series = stats.series,
                removed = stats.removed,
                "pruned stale window entries"
            );
        }
        Some(stats)
    }

    /// Run the sweep loop until shutdown signal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            window_secs = self.engine.window().num_seconds(),
            "retention maintainer started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep(Utc::now());
                }
                _ = shutdown.changed() => {
                    info!("retention maintainer shutting down");
                    break;
                }
            }
        }
    }
}
