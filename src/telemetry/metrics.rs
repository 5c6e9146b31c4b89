//! Metric instrument factories for workclaim.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"workclaim"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for workclaim instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("workclaim")
}

/// Counter: work items created by producers.
pub fn work_created() -> Counter<u64> {
    meter()
        .u64_counter("workclaim.work.created")
        .with_description("Number of work items created")
        .build()
}

/// Counter: claim attempts.
/// Labels: `result` ("claimed" | "empty" | "contended").
pub fn work_claims() -> Counter<u64> {
    meter()
        .u64_counter("workclaim.work.claims")
        .with_description("Number of claim attempts by outcome")
        .build()
}

/// Counter: work item step transitions.
/// Labels: `from`, `to`.
pub fn work_step_transitions() -> Counter<u64> {
    meter()
        .u64_counter("workclaim.work.step_transitions")
        .with_description("Number of work item step transitions")
        .build()
}

/// Counter: finished work items expunged by the reaper.
pub fn work_expunged() -> Counter<u64> {
    meter()
        .u64_counter("workclaim.reaper.expunged")
        .with_description("Finished work items deleted past retention")
        .build()
}

/// Counter: abandoned work items forced to error by the reaper.
pub fn work_recovered() -> Counter<u64> {
    meter()
        .u64_counter("workclaim.reaper.recovered")
        .with_description("Stale processing work items forced to error")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("workclaim.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
