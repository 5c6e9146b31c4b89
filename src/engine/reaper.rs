//! Reaper: periodic cleanup of finished work and recovery of abandoned work.
//!
//! Abandonment is detected by age alone. An item that has been processing
//! for longer than the staleness window is presumed to belong to a crashed
//! or hung worker and is forced to `error`, which releases its resource for
//! the next scheduled item.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tracing::{Instrument, error, info, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::work::{Step, WorkFilter, WorkItem};
use crate::store::WorkStore;
use crate::telemetry::metrics;
use crate::telemetry::work::start_sweep_span;

/// Reaper tunables.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Age past which `done` items are expunged.
    pub retention: Duration,
    /// Age past which `processing` items are presumed abandoned.
    pub staleness: Duration,
    /// Pause between sweeps.
    pub interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(3600),
            staleness: Duration::from_secs(600),
            interval: Duration::from_secs(300),
        }
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expunged: u64,
    pub recovered: usize,
}

/// Periodic maintenance over the work store.
///
/// Clones share one shutdown signal: [`shutdown`](Self::shutdown) stops every
/// running [`run`](Self::run) loop, including ones started afterwards.
#[derive(Clone)]
pub struct Reaper {
    store: Arc<dyn WorkStore>,
    clock: Arc<dyn Clock>,
    config: ReaperConfig,
    shutdown: Arc<Notify>,
    stopping: Arc<AtomicBool>,
}

/// `now - window`, or `Error::Config` when the result falls outside the
/// representable date range.
pub fn cutoff(now: DateTime<Utc>, window: Duration, name: &str) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .ok_or_else(|| {
            Error::Config(format!(
                "{name} window of {}s is out of range",
                window.as_secs()
            ))
        })
}

impl Reaper {
    pub fn new(store: Arc<dyn WorkStore>, clock: Arc<dyn Clock>, config: ReaperConfig) -> Self {
        Self {
            store,
            clock,
            config,
            shutdown: Arc::new(Notify::new()),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ReaperConfig {
        &self.config
    }

    /// Expunge `done` items taken at or before `cutoff`. Returns the number
    /// deleted; running again with the same cutoff deletes nothing.
    pub async fn delete_finished_work(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let filter = WorkFilter::new()
            .step(Step::Done)
            .taken_before(cutoff)
            .including_removed();

        let mut tx = self.store.begin().await?;
        let expunged = tx.expunge(&filter).await?;
        tx.commit().await?;

        if expunged > 0 {
            info!(count = expunged, %cutoff, "expunged finished work");
        }
        metrics::work_expunged().add(expunged, &[]);
        Ok(expunged)
    }

    /// Force every item processing since `cutoff` or earlier to `error`.
    ///
    /// Returns the recovered items in their new state. Each one is logged:
    /// it means a worker claimed work and never reported back.
    pub async fn find_unfinished_work(&self, cutoff: DateTime<Utc>) -> Result<Vec<WorkItem>> {
        let filter = WorkFilter::new()
            .step(Step::Processing)
            .taken_before(cutoff)
            .including_removed();

        let mut tx = self.store.begin().await?;
        let stale = tx.lock_rows(&filter, None).await?;
        let mut recovered = Vec::with_capacity(stale.len());
        for mut work in stale {
            work.advance(Step::Error)?;
            tx.update(&work).await?;
            recovered.push(work);
        }
        tx.commit().await?;

        for work in &recovered {
            warn!(
                id = %work.id,
                resource = %work.resource_id,
                seq = work.sequence_number,
                owner = work.owner_id.as_ref().map(|o| o.as_str()).unwrap_or("-"),
                taken_at = ?work.taken_at,
                "abandoned work item forced to error"
            );
        }
        if !recovered.is_empty() {
            metrics::work_step_transitions().add(
                recovered.len() as u64,
                &[
                    KeyValue::new("from", Step::Processing.as_str()),
                    KeyValue::new("to", Step::Error.as_str()),
                ],
            );
        }
        metrics::work_recovered().add(recovered.len() as u64, &[]);
        Ok(recovered)
    }

    /// Run cleanup then recovery with cutoffs derived from the clock.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let span = start_sweep_span();
        async {
            let now = self.clock.now();
            let retention_cutoff = cutoff(now, self.config.retention, "retention")?;
            let staleness_cutoff = cutoff(now, self.config.staleness, "staleness")?;

            let expunged = self.delete_finished_work(retention_cutoff).await?;
            let recovered = self.find_unfinished_work(staleness_cutoff).await?.len();

            span.record("work.expunged", expunged);
            span.record("work.recovered", recovered as u64);
            Ok::<_, Error>(SweepReport {
                expunged,
                recovered,
            })
        }
        .instrument(span.clone())
        .await
    }

    /// Signal every [`run`](Self::run) loop sharing this reaper to return.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        self.shutdown.notify_waiters();
    }

    /// Sweep every `interval` until shutdown. A failed sweep is logged and
    /// the loop carries on.
    pub async fn run(&self) -> Result<()> {
        info!(
            retention_secs = self.config.retention.as_secs(),
            staleness_secs = self.config.staleness.as_secs(),
            interval_secs = self.config.interval.as_secs(),
            "reaper started"
        );

        loop {
            // Register for the wakeup before reading the flag so a shutdown
            // between the two is not lost.
            let notified = self.shutdown.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.stopping.load(Ordering::Acquire) {
                info!("reaper shutting down");
                return Ok(());
            }

            tokio::select! {
                _ = &mut notified => {
                    info!("reaper shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }

            if let Err(e) = self.sweep().await {
                error!("reaper sweep failed: {e}");
            }
        }
    }
}
