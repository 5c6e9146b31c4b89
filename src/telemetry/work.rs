//! Work queue span helpers.
//!
//! Spans for claims, step updates and reaper sweeps, plus step-transition
//! events recorded on them.

use tracing::Span;

/// Start a span for a claim attempt.
///
/// The `work.id` and `work.resource` fields are declared empty and are
/// filled via [`record_claimed`] once an item is taken.
pub fn start_claim_span(owner: &str) -> Span {
    tracing::info_span!(
        "work.claim",
        "work.owner" = owner,
        "work.id" = tracing::field::Empty,
        "work.resource" = tracing::field::Empty,
    )
}

/// Record the claimed item on a claim span.
pub fn record_claimed(span: &Span, work_id: &str, resource: i64) {
    span.record("work.id", work_id);
    span.record("work.resource", resource);
}

/// Start a span for a step update. `target` describes how the item is
/// addressed (an id, or a resource/sequence pair).
pub fn start_advance_span(target: &str, to: &str) -> Span {
    tracing::info_span!(
        "work.advance",
        "work.target" = target,
        "work.step.to" = to,
    )
}

/// Start a span for one reaper sweep.
pub fn start_sweep_span() -> Span {
    tracing::info_span!(
        "work.sweep",
        "work.expunged" = tracing::field::Empty,
        "work.recovered" = tracing::field::Empty,
    )
}

/// Record step transition event on the given span.
pub fn record_step_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "step_transition");
    });
}
