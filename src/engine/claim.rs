//! Claimer: hands one eligible work item to a calling worker.

use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{Instrument, Span, debug, info};

use crate::clock::Clock;
use crate::error::Result;
use crate::model::work::{OwnerId, Step, WorkFilter, WorkItem};
use crate::store::WorkStore;
use crate::telemetry::metrics;
use crate::telemetry::work::{record_claimed, record_step_transition, start_claim_span};

/// Candidates locked per claim attempt unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: i64 = 10;

/// Claims scheduled work for workers, at most one processing item per
/// resource.
///
/// The candidate batch is locked for the whole attempt, so the "is another
/// item of this resource processing" check and the claim itself cannot
/// interleave with another worker's claim of the same rows.
#[derive(Clone)]
pub struct Claimer {
    store: Arc<dyn WorkStore>,
    clock: Arc<dyn Clock>,
    batch_size: i64,
}

impl Claimer {
    pub fn new(store: Arc<dyn WorkStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Number of candidates examined per attempt. Clamped to at least 1.
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Claim one scheduled item for `owner`.
    ///
    /// Returns `None` when nothing is claimable right now: either the queue
    /// is empty or every candidate's resource already has an item in
    /// processing. Callers should try again later.
    pub async fn take(&self, owner: &OwnerId) -> Result<Option<WorkItem>> {
        let span = start_claim_span(owner.as_str());
        let start = Instant::now();
        let result = self.take_in(owner, &span).instrument(span.clone()).await;
        metrics::operation_duration_ms().record(
            start.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "work.take")],
        );
        result
    }

    async fn take_in(&self, owner: &OwnerId, span: &Span) -> Result<Option<WorkItem>> {
        let mut tx = self.store.begin().await?;
        let candidates = tx
            .lock_rows(&WorkFilter::claimable(), Some(self.batch_size))
            .await?;

        let mut chosen = None;
        let mut skipped = 0usize;
        for candidate in candidates {
            let busy = WorkFilter::for_resource(candidate.resource_id)
                .step(Step::Processing)
                .including_removed();
            if tx.find(&busy, Some(1)).await?.is_empty() {
                chosen = Some(candidate);
                break;
            }
            skipped += 1;
            debug!(
                id = %candidate.id,
                resource = %candidate.resource_id,
                "resource busy, skipping candidate"
            );
        }

        let Some(mut work) = chosen else {
            tx.commit().await?;
            let result = if skipped > 0 { "contended" } else { "empty" };
            metrics::work_claims().add(1, &[KeyValue::new("result", result)]);
            return Ok(None);
        };

        work.claim(owner.clone(), self.clock.now())?;
        tx.update(&work).await?;
        tx.commit().await?;

        record_claimed(span, &work.id.0.to_string(), work.resource_id.0);
        record_step_transition(span, Step::Scheduled.as_str(), Step::Processing.as_str());
        metrics::work_claims().add(1, &[KeyValue::new("result", "claimed")]);
        metrics::work_step_transitions().add(
            1,
            &[
                KeyValue::new("from", Step::Scheduled.as_str()),
                KeyValue::new("to", Step::Processing.as_str()),
            ],
        );
        info!(
            id = %work.id,
            resource = %work.resource_id,
            seq = work.sequence_number,
            owner = %owner,
            skipped,
            "work claimed"
        );

        Ok(Some(work))
    }
}
