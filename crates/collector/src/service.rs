use std::time::Duration;

use chrono::Utc;
use common::config::CollectorConfig;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, instrument, warn};

use crate::aggregator::{Aggregator, CycleError};
use crate::metrics;
use crate::snapshot::SnapshotStore;

/// Drives the aggregator: once at start, then on every interval tick, until
/// shutdown is signalled.
pub struct Collector {
    config: CollectorConfig,
    aggregator: Aggregator,
    store: SnapshotStore,
}

impl Collector {
    pub fn new(config: CollectorConfig, aggregator: Aggregator, store: SnapshotStore) -> Self {
        Self {
            config,
            aggregator,
            store,
        }
    }

    /// Cycles never overlap: the next tick is only awaited once the current
    /// cycle returned, and ticks missed meanwhile are dropped. A cycle in
    /// flight when shutdown arrives is allowed to finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.interval_secs.max(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_secs = period.as_secs(),
            settings = %self.aggregator.settings(),
            "collector started"
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            // Failures are logged and counted inside; the loop carries on.
            let _ = self.run_once().await;
        }
        info!("collector stopped");
    }

    /// Runs a single cycle and publishes its snapshot. On failure the
    /// previous snapshot stays in place and the store reports down.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<(), CycleError> {
        let started = Utc::now();
        metrics::CYCLES_TOTAL.inc();
        metrics::LAST_RUN_TIMESTAMP.set(started.timestamp());
        let _timer = metrics::CYCLE_DURATION.start_timer();

        match self.aggregator.collect().await {
            Ok(snapshot) => {
                info!(
                    projects = snapshot.projects.len(),
                    merge_requests = snapshot.merge_requests.len(),
                    opened = snapshot.opened.len(),
                    merged = snapshot.merged.len(),
                    closed = snapshot.closed.len(),
                    elapsed_ms = (Utc::now() - started).num_milliseconds(),
                    "collection cycle complete"
                );
                self.store.publish(snapshot);
                metrics::CYCLE_SUCCESSES_TOTAL.inc();
                metrics::LAST_SUCCESS_TIMESTAMP.set(Utc::now().timestamp());
                Ok(())
            }
            Err(err) => {
                metrics::CYCLE_FAILURES_TOTAL
                    .with_label_values(&[err.kind()])
                    .inc();
                self.store.mark_failed();
                warn!(error = %err, kind = err.kind(), "collection cycle failed; keeping previous snapshot");
                Err(err)
            }
        }
    }
}
