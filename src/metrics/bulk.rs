//! Bulk command pipeline metrics

use opentelemetry::metrics::{Counter, Meter};
use std::sync::OnceLock;

static BULK_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    BULK_METER.get_or_init(|| opentelemetry::global::meter("tasker-bulk"))
}

/// Commands accepted by `BulkService::submit`
///
/// Labels: action
pub fn commands_submitted_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.bulk.commands.submitted.total")
        .with_description("Bulk commands accepted")
        .build()
}

/// Commands rejected during validation
pub fn commands_rejected_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.bulk.commands.rejected.total")
        .with_description("Bulk commands rejected by validation")
        .build()
}

/// Buckets handed to an action computation
pub fn buckets_processed_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.bulk.buckets.processed.total")
        .with_description("Buckets processed by action computations")
        .build()
}

/// Individual ids whose processing failed inside a bucket
///
/// Labels: action
pub fn record_failures_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.bulk.record_failures.total")
        .with_description("Per-record failures inside bulk buckets")
        .build()
}
