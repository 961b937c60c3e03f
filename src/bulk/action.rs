//! # Bulk Action Contract
//!
//! A [`BulkAction`] is applied to one bucket of document ids at a time. The
//! pipeline opens an [`ActionSession`] per bucket, hands it to
//! [`BulkAction::compute`] and commits it once the whole bucket has been
//! visited. Most actions only implement [`BulkAction::compute_record`]; the
//! default `compute` loops over the ids, catching errors and panics per id so
//! that one bad document never fails its bucket.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::command::BulkCommand;
use super::errors::{ActionError, RepositoryError};
use super::repository::{PermissionChecker, RepositorySession};
use super::status::RecordError;
use crate::error::panic_message;

/// Parameters of a command as seen by its action
pub type ActionParams = HashMap<String, Value>;

/// JSON type a declared parameter must have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    String,
    Boolean,
    Integer,
    Number,
    Object,
    Array,
    Any,
}

impl ParameterKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Boolean => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }
}

impl std::fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

/// A parameter an action declares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
    pub required: bool,
}

impl ParameterSpec {
    pub fn required(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
}

/// Result of applying an action to one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Processed,
    /// A precondition did not hold; the document was left untouched
    Skipped(String),
}

/// Tally of one bucket
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketOutcome {
    /// Ids visited, whatever their outcome
    pub processed: u64,
    pub skipped: u64,
    pub errors: Vec<RecordError>,
}

impl BucketOutcome {
    pub fn record(&mut self, id: &str, result: Result<RecordOutcome, ActionError>) {
        self.processed += 1;
        match result {
            Ok(RecordOutcome::Processed) => {}
            Ok(RecordOutcome::Skipped(reason)) => {
                self.skipped += 1;
                tracing::debug!(document_id = %id, reason = %reason, "Document skipped");
            }
            Err(error) => self.errors.push(RecordError {
                id: id.to_string(),
                message: error.to_string(),
            }),
        }
    }

    /// Every id failed with the same message
    pub fn failed(ids: &[String], message: &str) -> Self {
        Self {
            processed: ids.len() as u64,
            skipped: 0,
            errors: ids
                .iter()
                .map(|id| RecordError {
                    id: id.clone(),
                    message: message.to_string(),
                })
                .collect(),
        }
    }
}

/// Repository session bound to the command's principal
pub struct ActionSession {
    principal: String,
    session: Box<dyn RepositorySession>,
    permissions: Arc<dyn PermissionChecker>,
}

impl ActionSession {
    pub fn new(
        principal: impl Into<String>,
        session: Box<dyn RepositorySession>,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Self {
        Self {
            principal: principal.into(),
            session,
            permissions,
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub async fn exists(&self, id: &str) -> Result<bool, RepositoryError> {
        self.session.exists(id).await
    }

    pub async fn get_property(&self, id: &str, name: &str) -> Result<Option<Value>, RepositoryError> {
        self.session.get_property(id, name).await
    }

    pub async fn set_property(&mut self, id: &str, name: &str, value: Value) -> Result<(), RepositoryError> {
        self.session.set_property(id, name, value).await
    }

    /// Whether the principal holds `permission` on all `ids`
    pub async fn can_perform(&self, ids: &[String], permission: &str) -> bool {
        self.permissions
            .can_perform(&self.principal, ids, permission)
            .await
    }

    pub(crate) async fn commit(&mut self) -> Result<(), RepositoryError> {
        self.session.commit().await
    }
}

impl std::fmt::Debug for ActionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSession")
            .field("principal", &self.principal)
            .finish()
    }
}

/// Business operation applied to every id of a bulk command
///
/// One instance lives per action computation partition and sees buckets of
/// many commands, one at a time.
#[async_trait]
pub trait BulkAction: Send + 'static {
    /// Called before each bucket with the command it belongs to
    async fn start_bucket(&mut self, _command: &BulkCommand) -> Result<(), ActionError> {
        Ok(())
    }

    /// Apply the action to a bucket
    async fn compute(
        &mut self,
        session: &mut ActionSession,
        ids: &[String],
        params: &ActionParams,
    ) -> BucketOutcome {
        let mut outcome = BucketOutcome::default();
        for id in ids {
            let result = match AssertUnwindSafe(self.compute_record(session, id, params))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => Err(ActionError::failed(format!(
                    "action panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            };
            outcome.record(id, result);
        }
        outcome
    }

    /// Apply the action to one document
    async fn compute_record(
        &mut self,
        session: &mut ActionSession,
        id: &str,
        params: &ActionParams,
    ) -> Result<RecordOutcome, ActionError>;
}
