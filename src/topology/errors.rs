//! Topology error types

use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or running a computation topology
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TopologyError {
    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    #[error("Duplicate stream definition: {0}")]
    DuplicateStream(String),

    #[error("Duplicate computation definition: {0}")]
    DuplicateComputation(String),

    #[error("Computation {computation} cannot produce to undeclared output stream {stream}")]
    UndeclaredOutput { computation: String, stream: String },

    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Record filter {filter} failed: {reason}")]
    Filter { filter: String, reason: String },

    #[error("Stream {0} is closed")]
    StreamClosed(String),

    #[error("Stream processor is shut down")]
    ShutDown,

    #[error("Stream processor did not drain within {0:?}")]
    Timeout(Duration),
}

impl TopologyError {
    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Filter { .. })
    }
}
