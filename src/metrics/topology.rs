//! Stream topology runtime metrics

use opentelemetry::metrics::{Counter, Meter};
use std::sync::OnceLock;

static TOPOLOGY_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    TOPOLOGY_METER.get_or_init(|| opentelemetry::global::meter("tasker-topology"))
}

/// Records handed to a computation
///
/// Labels: computation, stream
pub fn records_processed_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.topology.records.processed.total")
        .with_description("Records processed by computations")
        .build()
}

/// Redelivery attempts after a transient failure
pub fn records_retried_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.topology.records.retried.total")
        .with_description("Record redeliveries after transient failures")
        .build()
}

/// Records abandoned after exhausting redelivery or failing permanently
pub fn records_dropped_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.topology.records.dropped.total")
        .with_description("Records abandoned after processing failures")
        .build()
}
