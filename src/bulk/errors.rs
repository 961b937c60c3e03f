//! Bulk pipeline errors

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::topology::TopologyError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BulkError {
    /// Rejected at submission; nothing was scheduled
    #[error("Invalid command parameter {parameter}: {reason}")]
    InvalidCommand { parameter: String, reason: String },

    #[error("Unknown bulk command: {0}")]
    CommandNotFound(Uuid),

    #[error("Bulk action already registered: {0}")]
    DuplicateAction(String),

    #[error("Invalid bulk action name {name}: {reason}")]
    InvalidActionName { name: String, reason: String },

    #[error("Bulk command {command_id} did not complete within {timeout:?}")]
    Timeout { command_id: Uuid, timeout: Duration },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Bulk service is shut down")]
    ShutDown,

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

impl BulkError {
    pub fn invalid_command(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCommand {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for BulkError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Failures reported by a repository implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    #[error("Write conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Whether retrying later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Conflict(_))
    }
}

/// Failure of one action on one document
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("Permission {permission} denied on {id}")]
    PermissionDenied { id: String, permission: String },

    #[error("Invalid action parameter {parameter}: {reason}")]
    InvalidParameter { parameter: String, reason: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
