//! Record filters
//!
//! Filters are attached to a stream and transform every record on its way in
//! (`before_append`) and on its way out to a consumer (`after_read`). They run
//! in declaration order on append and in reverse order on read.

use async_trait::async_trait;
use thiserror::Error;

use super::record::Record;

/// Failure raised by a record filter
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    /// The payload behind an overflow reference cannot be read back
    #[error("Overflow payload unavailable for {reference}: {reason}")]
    OverflowUnavailable { reference: String, reason: String },

    /// Spilling a large payload to the overflow store failed
    #[error("Overflow write failed for record {key}: {reason}")]
    OverflowWrite { key: String, reason: String },
}

/// Stream-level record transformation
#[async_trait]
pub trait RecordFilter: Send + Sync + 'static {
    /// Filter name used in logs and errors
    fn name(&self) -> &str;

    /// Transform a record before it is appended to `stream`
    async fn before_append(&self, stream: &str, record: Record) -> Result<Record, FilterError>;

    /// Transform a record read from `stream` before it reaches a consumer
    async fn after_read(&self, stream: &str, record: Record) -> Result<Record, FilterError>;
}

impl std::fmt::Debug for dyn RecordFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordFilter")
            .field("name", &self.name())
            .finish()
    }
}
