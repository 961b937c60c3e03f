//! Computation contract
//!
//! A computation is a user-supplied record processor. The runtime creates one
//! instance per partition through a [`ComputationFactory`] and feeds each
//! instance sequentially, so instances may keep state across records without
//! locking.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::errors::TopologyError;
use super::processor::StreamRouter;
use super::record::Record;

/// Failure of a single `process_record` call
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComputationError {
    /// Transient failure; the record is redelivered after the retry delay
    #[error("Retryable computation failure: {0}")]
    Retryable(String),

    /// The record cannot be processed; it is dropped after logging
    #[error("Permanent computation failure: {0}")]
    Permanent(String),

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

impl ComputationError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Retryable(_) => true,
            Self::Permanent(_) => false,
            Self::Topology(error) => error.is_transient(),
        }
    }
}

/// Record processor run by the stream runtime
#[async_trait]
pub trait Computation: Send + 'static {
    /// Called once before the first record is delivered
    async fn init(&mut self, _ctx: &ComputationContext) -> Result<(), ComputationError> {
        Ok(())
    }

    /// Process one record read from `input_stream`
    async fn process_record(
        &mut self,
        ctx: &ComputationContext,
        input_stream: &str,
        record: Record,
    ) -> Result<(), ComputationError>;

    /// Called after `record` is given up on, either on a permanent failure
    /// or once its retries are exhausted. The record is not redelivered.
    async fn record_dropped(
        &mut self,
        _ctx: &ComputationContext,
        _input_stream: &str,
        _record: &Record,
        _reason: &str,
    ) {
    }

    /// Called once when the runtime shuts down
    async fn destroy(&mut self) {}
}

/// Builds a fresh computation instance per partition
pub type ComputationFactory = Arc<dyn Fn() -> Box<dyn Computation> + Send + Sync>;

/// Static description of a computation's wiring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputationMetadata {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Handle given to a computation instance for producing records
#[derive(Clone)]
pub struct ComputationContext {
    computation: Arc<str>,
    partition: usize,
    outputs: Arc<HashSet<String>>,
    router: Arc<StreamRouter>,
}

impl ComputationContext {
    pub(crate) fn new(
        computation: Arc<str>,
        partition: usize,
        outputs: Arc<HashSet<String>>,
        router: Arc<StreamRouter>,
    ) -> Self {
        Self {
            computation,
            partition,
            outputs,
            router,
        }
    }

    pub fn computation(&self) -> &str {
        &self.computation
    }

    /// Partition this instance owns
    pub fn partition(&self) -> usize {
        self.partition
    }

    /// Append a record to one of the computation's declared output streams
    ///
    /// Waits while a downstream instance channel is full.
    pub async fn produce(&self, stream: &str, record: Record) -> Result<(), TopologyError> {
        if !self.outputs.contains(stream) {
            return Err(TopologyError::UndeclaredOutput {
                computation: self.computation.to_string(),
                stream: stream.to_string(),
            });
        }
        self.router.append(stream, record).await
    }
}

impl std::fmt::Debug for ComputationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputationContext")
            .field("computation", &self.computation)
            .field("partition", &self.partition)
            .field("outputs", &self.outputs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(ComputationError::retryable("db busy").is_retryable());
        assert!(!ComputationError::permanent("bad record").is_retryable());
        assert!(!ComputationError::from(TopologyError::ShutDown).is_retryable());
        assert!(ComputationError::from(TopologyError::Filter {
            filter: "overflow".to_string(),
            reason: "store full".to_string(),
        })
        .is_retryable());
    }
}
