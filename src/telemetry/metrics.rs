//! Metric instrument factories for resq-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"resq-rs"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for resq-rs instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("resq-rs")
}

/// Counter: jobs that reached a terminal outcome.
/// Labels: `queue`, `class`, `result` ("succeeded" | "failed").
pub fn jobs_finished() -> Counter<u64> {
    meter()
        .u64_counter("resq.jobs.finished")
        .with_description("Number of jobs that finished, by outcome")
        .build()
}

/// Counter: queue-level operations (enqueue, pop, pop_empty, requeue).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("resq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Histogram: handler execution time in milliseconds.
/// Labels: `class`.
pub fn handler_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("resq.handler.duration_ms")
        .with_description("Handler execution time in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: acquires that returned without a connection.
/// Labels: `reason` ("timeout" | "exhausted").
pub fn pool_acquire_failures() -> Counter<u64> {
    meter()
        .u64_counter("resq.pool.acquire_failures")
        .with_description("Connection pool acquires that failed")
        .build()
}

/// Counter: lifecycle writes (open, start, finish, close) the store rejected.
/// Labels: `operation`.
pub fn lifecycle_write_failures() -> Counter<u64> {
    meter()
        .u64_counter("resq.lifecycle.write_failures")
        .with_description("Advisory lifecycle writes that failed")
        .build()
}

/// Counter: jobs popped whose class has no registered handler.
/// Labels: `class`.
pub fn jobs_unhandled() -> Counter<u64> {
    meter()
        .u64_counter("resq.jobs.unhandled")
        .with_description("Jobs with no matching handler")
        .build()
}
