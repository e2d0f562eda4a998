//! Instruments describing the framework's own activity.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op and recording
//! costs next to nothing.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("kpi-metrics")
}

/// Counter: mutations refused by policy or validation.
/// Labels: `metric`, `operation`, `reason`.
pub fn rejected_mutations() -> Counter<u64> {
    meter()
        .u64_counter("kpi.mutations.rejected")
        .with_description("Mutations refused by the KPI mutation policy")
        .build()
}

/// Counter: metric instances created.
/// Labels: `metric`.
pub fn instances_created() -> Counter<u64> {
    meter()
        .u64_counter("kpi.instances.created")
        .with_description("Metric instances created on first use of a label set")
        .build()
}

/// Counter: push attempts.
/// Labels: `job`, `result` ("ok" | "error").
pub fn push_attempts() -> Counter<u64> {
    meter()
        .u64_counter("kpi.push.attempts")
        .with_description("Snapshot pushes to a gateway")
        .build()
}

/// Histogram: push duration in milliseconds.
/// Labels: `job`.
pub fn push_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("kpi.push.duration_ms")
        .with_description("Snapshot push duration in milliseconds")
        .with_unit("ms")
        .build()
}

pub fn record_rejection(metric: &str, operation: &str, reason: &'static str) {
    rejected_mutations().add(
        1,
        &[
            KeyValue::new("metric", metric.to_string()),
            KeyValue::new("operation", operation.to_string()),
            KeyValue::new("reason", reason),
        ],
    );
}

pub fn record_push(job: &str, ok: bool, duration_ms: f64) {
    let job = KeyValue::new("job", job.to_string());
    push_attempts().add(
        1,
        &[job.clone(), KeyValue::new("result", if ok { "ok" } else { "error" })],
    );
    push_duration_ms().record(duration_ms, &[job]);
}
