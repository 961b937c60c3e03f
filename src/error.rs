//! Error types for the Tasker bulk core.
//!
//! Each subsystem owns a focused error enum (`OverflowError`, `SchedulingError`,
//! `TopologyError`, `BulkError`, ...). They all fold into [`TaskerError`] so that
//! embedders can propagate any of them with `?`.

use thiserror::Error;

use crate::bulk::BulkError;
use crate::config::ConfigurationError;
use crate::overflow::OverflowError;
use crate::scheduler::SchedulingError;
use crate::topology::{FilterError, TopologyError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskerError {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
    #[error("Overflow store error: {0}")]
    OverflowError(String),
    #[error("Overflow unavailable: {0}")]
    OverflowUnavailable(String),
    #[error("Scheduling failure: {0}")]
    SchedulingFailure(String),
    #[error("Topology error: {0}")]
    TopologyError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Timeout error: {0}")]
    Timeout(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for TaskerError {
    fn from(error: serde_json::Error) -> Self {
        TaskerError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

impl From<OverflowError> for TaskerError {
    fn from(error: OverflowError) -> Self {
        TaskerError::OverflowError(error.to_string())
    }
}

impl From<FilterError> for TaskerError {
    fn from(error: FilterError) -> Self {
        TaskerError::OverflowUnavailable(error.to_string())
    }
}

impl From<SchedulingError> for TaskerError {
    fn from(error: SchedulingError) -> Self {
        TaskerError::SchedulingFailure(error.to_string())
    }
}

impl From<TopologyError> for TaskerError {
    fn from(error: TopologyError) -> Self {
        TaskerError::TopologyError(error.to_string())
    }
}

impl From<BulkError> for TaskerError {
    fn from(error: BulkError) -> Self {
        match error {
            BulkError::InvalidCommand { .. } => TaskerError::InvalidCommand(error.to_string()),
            BulkError::Topology(inner) => inner.into(),
            other => TaskerError::Internal(other.to_string()),
        }
    }
}

impl From<ConfigurationError> for TaskerError {
    fn from(error: ConfigurationError) -> Self {
        TaskerError::ConfigurationError(error.to_string())
    }
}

pub type TaskerResult<T> = std::result::Result<T, TaskerError>;

/// Extract a readable message from a caught panic payload
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
