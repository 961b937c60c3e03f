//! # Computation Topology
//!
//! Named streams connected by computations. A [`TopologyBuilder`] validates the
//! wiring; a [`StreamProcessor`] runs it with a fixed number of instances per
//! computation, keyed routing and bounded channels between stages.

pub mod builder;
pub mod computation;
pub mod errors;
pub mod filter;
pub mod partition;
pub mod processor;
pub mod record;

pub use builder::{ComputationDefinition, StreamDefinition, Topology, TopologyBuilder};
pub use computation::{
    Computation, ComputationContext, ComputationError, ComputationFactory, ComputationMetadata,
};
pub use errors::TopologyError;
pub use filter::{FilterError, RecordFilter};
pub use partition::partition_for;
pub use processor::{ComputationStats, StreamProcessor};
pub use record::{Record, RecordPayload};
