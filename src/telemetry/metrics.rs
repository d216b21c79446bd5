//! Metric instrument factories for hermes.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"hermes"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for hermes instruments.
fn meter() -> Meter {
    opentelemetry::global::meter(super::SERVICE_NAME)
}

/// Counter: events appended to the log.
pub fn events_recorded() -> Counter<u64> {
    meter()
        .u64_counter("hermes.events.recorded")
        .with_description("Number of events recorded")
        .build()
}

/// Counter: labors opened by matching passes.
pub fn labors_opened() -> Counter<u64> {
    meter()
        .u64_counter("hermes.labors.opened")
        .with_description("Number of labors opened")
        .build()
}

/// Counter: labors closed by matching passes.
pub fn labors_completed() -> Counter<u64> {
    meter()
        .u64_counter("hermes.labors.completed")
        .with_description("Number of labors completed")
        .build()
}

/// Counter: quests stamped complete.
pub fn quests_completed() -> Counter<u64> {
    meter()
        .u64_counter("hermes.quests.completed")
        .with_description("Number of quests completed")
        .build()
}

/// Counter: fate snapshots loaded from the store (cache misses).
pub fn fate_snapshot_loads() -> Counter<u64> {
    meter()
        .u64_counter("hermes.fates.snapshot_loads")
        .with_description("Number of fate snapshot loads")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("hermes.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
