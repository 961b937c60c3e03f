//! Overflow store and record filter metrics

use opentelemetry::metrics::{Counter, Meter};
use std::sync::OnceLock;

static OVERFLOW_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    OVERFLOW_METER.get_or_init(|| opentelemetry::global::meter("tasker-overflow"))
}

/// Records whose payload was moved into the overflow store
pub fn records_spilled_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.overflow.records.spilled.total")
        .with_description("Records redirected through the overflow store")
        .build()
}

/// Payload bytes written through the filter
pub fn bytes_spilled_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.overflow.bytes.spilled.total")
        .with_description("Payload bytes redirected through the overflow store")
        .with_unit("By")
        .build()
}

/// Overflow references that could not be resolved on read
///
/// Labels: stream, reason
pub fn data_loss_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.overflow.data_loss.total")
        .with_description("Overflow references that could not be resolved")
        .build()
}

/// Incomplete entries evicted before their producer marked them complete
pub fn incomplete_evictions_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.overflow.incomplete_evictions.total")
        .with_description("Incomplete overflow entries evicted by TTL or size")
        .build()
}
