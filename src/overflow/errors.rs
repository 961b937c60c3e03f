//! Overflow store errors

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverflowError {
    /// No entry under this key, or it was evicted while still being written
    #[error("Overflow entry not found: {key}")]
    NotFound { key: String },

    /// The entry exists but its producer has not marked it complete
    #[error("Overflow entry is not complete: {key}")]
    Incomplete { key: String },

    /// Completed entries are immutable
    #[error("Overflow entry already completed: {key}")]
    AlreadyCompleted { key: String },

    #[error("Overflow store unavailable: {0}")]
    StoreUnavailable(String),
}

pub type OverflowResult<T> = Result<T, OverflowError>;
