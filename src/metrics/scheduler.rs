//! Work scheduler metrics

use opentelemetry::metrics::{Counter, Histogram, Meter};
use std::sync::OnceLock;

static SCHEDULER_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    SCHEDULER_METER.get_or_init(|| opentelemetry::global::meter("tasker-scheduler"))
}

/// Work instances accepted into a queue
///
/// Labels: category
pub fn work_scheduled_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.work.scheduled.total")
        .with_description("Work instances accepted into a category queue")
        .build()
}

/// Work instances whose body returned normally
pub fn work_completed_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.work.completed.total")
        .with_description("Work instances completed successfully")
        .build()
}

/// Work instances whose body returned an error or panicked
///
/// Labels: category, failure_type (error, panic)
pub fn work_failures_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.work.failures.total")
        .with_description("Work instances that failed")
        .build()
}

/// Work instances suspended by a forced reschedule or shutdown
pub fn work_suspended_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.work.suspended.total")
        .with_description("Work instances suspended")
        .build()
}

/// Body execution duration in milliseconds
pub fn work_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("tasker.work.duration")
        .with_description("Work body execution time in milliseconds")
        .with_unit("ms")
        .build()
}
