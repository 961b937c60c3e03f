//! # OpenTelemetry Metrics
//!
//! Counters and histograms for the scheduler, the topology runtime, the overflow
//! store and the bulk pipeline. Instruments are created through the global meter
//! provider, so they are no-ops until the embedder installs an SDK provider.
//!
//! ```rust
//! use tasker_bulk::metrics::scheduler::work_failures_total;
//! use opentelemetry::KeyValue;
//!
//! work_failures_total().add(1, &[KeyValue::new("category", "renditions")]);
//! ```

pub mod bulk;
pub mod overflow;
pub mod scheduler;
pub mod topology;
