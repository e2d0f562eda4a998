//! Span helpers for push operations.

use tracing::Span;

/// Start a span for one snapshot push.
///
/// `push.bytes` and `push.result` are declared empty and filled by
/// [`record_push_outcome`].
pub fn start_push_span(endpoint: &str, job: &str) -> Span {
    tracing::info_span!(
        "kpi.push",
        "push.endpoint" = endpoint,
        "push.job" = job,
        "push.bytes" = tracing::field::Empty,
        "push.result" = tracing::field::Empty,
    )
}

/// Record the size of the pushed snapshot and how the push ended.
pub fn record_push_outcome(span: &Span, bytes: usize, ok: bool) {
    span.record("push.bytes", bytes as u64);
    span.record("push.result", if ok { "ok" } else { "error" });
}
