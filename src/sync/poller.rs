//! Deadline-bounded queue poller
//!
//! Each tick reproduces one scheduler invocation: claim up to the page size
//! of due queue items, process them sequentially, and stop claiming work the
//! moment the wall-clock deadline passes. The deadline keeps every tick
//! inside the external scheduler's own timeout no matter how deep the queue
//! is; items left over stay pending for the next tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::engine::{SyncEngine, SyncOptions};
use crate::database::Database;
use crate::error::DbError;
use crate::marketplace::RetryPolicy;
use crate::models::{SyncQueueItem, DEFAULT_SYNC_INTERVAL_SECS};

/// A failing integration is retried no sooner than this, so it cannot
/// starve healthy ones
const FAILURE_RESCHEDULE_FLOOR_SECS: u64 = 60;

/// Poller settings
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Maximum queue items claimed per tick
    pub page_size: u32,
    /// Wall-clock budget per tick; checked between items, never mid-item
    pub deadline: Duration,
    /// Sync attempts per item within one tick
    pub max_attempts: u32,
    /// Backoff curve between attempts (shared with the API client)
    pub retry: RetryPolicy,
    /// Time between ticks
    pub tick_interval: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            page_size: 10,
            deadline: Duration::from_millis(9500),
            max_attempts: 3,
            retry: RetryPolicy::default(),
            tick_interval: Duration::from_secs(10),
        }
    }
}

/// Result of one poller tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Items whose sync ran (successfully or not)
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// True when the deadline cut the batch short
    pub deadline_hit: bool,
}

/// Queue poller driving the sync engine
pub struct QueuePoller<D: Database> {
    db: Arc<D>,
    engine: Arc<SyncEngine<D>>,
    settings: PollerSettings,
}

impl<D: Database> QueuePoller<D> {
    /// Create a new poller
    pub fn new(db: Arc<D>, engine: Arc<SyncEngine<D>>, settings: PollerSettings) -> Self {
        Self {
            db,
            engine,
            settings,
        }
    }

    /// Run a single bounded tick
    pub async fn run_once(&self) -> Result<PollStats, DbError> {
        let started = Instant::now();
        let mut stats = PollStats::default();

        let items = self
            .db
            .claim_due_queue_items(Utc::now(), self.settings.page_size)
            .await?;

        if items.is_empty() {
            return Ok(stats);
        }

        debug!(claimed = items.len(), "Claimed due queue items");

        let mut iter = items.into_iter();
        while let Some(item) = iter.next() {
            if started.elapsed() >= self.settings.deadline {
                stats.deadline_hit = true;
                // Put this and every remaining claimed item back untouched;
                // the next tick picks them up
                self.release(&item).await;
                for rest in iter.by_ref() {
                    self.release(&rest).await;
                }
                warn!(
                    processed = stats.processed,
                    "Deadline reached mid-batch, leaving remaining items pending"
                );
                break;
            }

            if self.process_item(&item).await {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }
            stats.processed += 1;
        }

        Ok(stats)
    }

    /// Run the poller until shutdown is signaled
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            tick_secs = self.settings.tick_interval.as_secs(),
            page_size = self.settings.page_size,
            "Starting queue poller"
        );

        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping queue poller");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(stats) if stats.processed > 0 => {
                            info!(
                                processed = stats.processed,
                                succeeded = stats.succeeded,
                                failed = stats.failed,
                                deadline_hit = stats.deadline_hit,
                                "Poller tick completed"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!(error = %err, "Poller tick failed");
                        }
                    }
                }
            }
        }
    }

    /// Sync one item with per-item retries, then reschedule it
    async fn process_item(&self, item: &SyncQueueItem) -> bool {
        let mut attempt = 0u32;

        let success = loop {
            match self
                .engine
                .sync(item.integration_id, &SyncOptions::default())
                .await
            {
                Ok(report) if report.success => break true,
                Ok(report) => {
                    if !report.retryable() || attempt + 1 >= self.settings.max_attempts {
                        break false;
                    }
                    let delay = self.settings.retry.delay_for(attempt);
                    debug!(
                        integration_id = item.integration_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Sync failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(
                        integration_id = item.integration_id,
                        error = %err,
                        "Sync aborted"
                    );
                    break false;
                }
            }
        };

        let interval_secs = match self.db.get_integration(item.integration_id).await {
            Ok(Some(integration)) => u64::from(integration.sync_interval_secs()),
            _ => u64::from(DEFAULT_SYNC_INTERVAL_SECS),
        };

        // Success reschedules at the integration's own cadence; exhausted
        // failure backs off to at least the floor
        let delay_secs = if success {
            interval_secs
        } else {
            interval_secs.max(FAILURE_RESCHEDULE_FLOOR_SECS)
        };
        let next = Utc::now() + chrono::Duration::seconds(delay_secs as i64);

        if let Err(err) = self.db.reschedule_queue_item(item.id, next).await {
            warn!(
                queue_item = item.id,
                error = %err,
                "Failed to reschedule queue item"
            );
        }

        success
    }

    async fn release(&self, item: &SyncQueueItem) {
        if let Err(err) = self
            .db
            .reschedule_queue_item(item.id, item.next_sync_at)
            .await
        {
            warn!(
                queue_item = item.id,
                error = %err,
                "Failed to release unprocessed queue item"
            );
        }
    }
}
