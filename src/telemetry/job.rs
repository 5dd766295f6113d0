//! Job execution span helpers.
//!
//! One span per dequeued job, carrying queue, class, and the worker identity.

use tracing::Span;

/// Start a span for one job's lifecycle on a worker.
///
/// The `job.state` field is declared empty and filled by
/// [`record_state_transition`].
pub fn start_job_span(queue: &str, class: &str, worker: &str) -> Span {
    tracing::info_span!(
        "job.execute",
        "job.queue" = queue,
        "job.class" = class,
        "job.worker" = worker,
        "job.state" = tracing::field::Empty,
    )
}

/// Record a state transition on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("job.state", to);
    span.in_scope(|| {
        tracing::debug!(from = from, to = to, "state_transition");
    });
}
