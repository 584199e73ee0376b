//! Metric instrument factories for keyq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op.

use std::time::Duration;

use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};

fn meter() -> Meter {
    opentelemetry::global::meter("keyq")
}

/// Counter: submissions.
/// Labels: `result` ("accepted" | "duplicate" | "closed").
pub fn items_submitted() -> Counter<u64> {
    meter()
        .u64_counter("keyq.items.submitted")
        .with_description("Number of items submitted to the dispatcher")
        .build()
}

/// Counter: items that left their queue for good.
/// Labels: `outcome` ("completed" | "dropped").
pub fn items_processed() -> Counter<u64> {
    meter()
        .u64_counter("keyq.items.processed")
        .with_description("Number of items completed or dropped")
        .build()
}

/// Counter: failed attempts that were requeued for another try.
pub fn items_retried() -> Counter<u64> {
    meter()
        .u64_counter("keyq.items.retried")
        .with_description("Number of failed attempts requeued for retry")
        .build()
}

/// Counter: worker teardowns after a queue drained.
pub fn keys_drained() -> Counter<u64> {
    meter()
        .u64_counter("keyq.keys.drained")
        .with_description("Number of key queues drained to empty")
        .build()
}

/// Up-down counter: workers currently draining a key.
pub fn active_workers() -> UpDownCounter<i64> {
    meter()
        .i64_up_down_counter("keyq.workers.active")
        .with_description("Workers currently draining a key")
        .build()
}

/// Histogram: duration of one processing attempt.
pub fn item_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("keyq.item.duration_ms")
        .with_description("Processing attempt duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Histogram: duration of external calls made by the reply processor.
/// Labels: `operation` ("completion" | "delivery").
pub fn call_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("keyq.call.duration_ms")
        .with_description("External call duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Whole milliseconds for duration fields and histograms, saturating at
/// `u64::MAX`.
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
