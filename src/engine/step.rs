//! StepTracker: moves claimed work to a terminal step under a row lock.

use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::{Instrument, Span, debug, info};

use crate::error::{Error, Result};
use crate::model::work::{ResourceId, Step, WorkFilter, WorkId, WorkItem};
use crate::store::WorkStore;
use crate::telemetry::metrics;
use crate::telemetry::work::{record_step_transition, start_advance_span};

/// Records completion or failure of work items.
///
/// A missing row, a removed row or a row that is already terminal is not an
/// error: a concurrent path (usually the reaper) got there first. Those
/// calls return `Ok(None)` and change nothing.
///
/// Only claimed work can be marked `done`. Unclaimed work may be cancelled
/// to `error`.
#[derive(Clone)]
pub struct StepTracker {
    store: Arc<dyn WorkStore>,
}

impl StepTracker {
    pub fn new(store: Arc<dyn WorkStore>) -> Self {
        Self { store }
    }

    /// Advance the item addressed by `(resource, sequence_number)`.
    pub async fn advance_by_sequence(
        &self,
        resource: ResourceId,
        sequence_number: i64,
        step: Step,
    ) -> Result<Option<WorkItem>> {
        let filter = WorkFilter::for_resource(resource).sequence(sequence_number);
        self.advance(filter, &format!("{resource}/{sequence_number}"), step)
            .await
    }

    /// Advance the item with the given id.
    pub async fn advance_by_id(&self, id: WorkId, step: Step) -> Result<Option<WorkItem>> {
        self.advance(WorkFilter::by_id(id), &id.0.to_string(), step)
            .await
    }

    async fn advance(
        &self,
        filter: WorkFilter,
        target: &str,
        to: Step,
    ) -> Result<Option<WorkItem>> {
        // Scheduled and Processing are only ever entered at creation and by
        // a claim.
        if !to.is_terminal() {
            return Err(Error::NonTerminalTarget(to.to_string()));
        }

        let span = start_advance_span(target, to.as_str());
        self.advance_in(&filter, to, &span)
            .instrument(span.clone())
            .await
    }

    async fn advance_in(
        &self,
        filter: &WorkFilter,
        to: Step,
        span: &Span,
    ) -> Result<Option<WorkItem>> {
        let mut tx = self.store.begin().await?;
        let rows = tx.lock_rows(filter, Some(1)).await?;

        let Some(mut work) = rows.into_iter().next() else {
            tx.commit().await?;
            debug!("no matching work item, nothing to advance");
            return Ok(None);
        };
        if work.step.is_terminal() {
            tx.commit().await?;
            debug!(id = %work.id, step = %work.step, "work item already finished");
            return Ok(None);
        }

        let from = work.advance(to)?;
        tx.update(&work).await?;
        tx.commit().await?;

        record_step_transition(span, from.as_str(), to.as_str());
        metrics::work_step_transitions().add(
            1,
            &[
                KeyValue::new("from", from.as_str()),
                KeyValue::new("to", to.as_str()),
            ],
        );
        info!(
            id = %work.id,
            resource = %work.resource_id,
            seq = work.sequence_number,
            %from,
            %to,
            "work step advanced"
        );

        Ok(Some(work))
    }
}
