use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingError {
    #[error("Work scheduler is shut down")]
    ShutDown,

    #[error("Queue for category {category} is unavailable")]
    QueueUnavailable { category: String },

    #[error("Invalid work: {0}")]
    InvalidWork(String),

    #[error("Work scheduler did not stop within {0:?}")]
    ShutdownTimeout(Duration),
}
