//! Bulk commands and the bucket records derived from them

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity and repository a command runs against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTarget {
    pub principal: String,
    pub repository: String,
}

impl Default for ExecutionTarget {
    fn default() -> Self {
        Self {
            principal: "system".to_string(),
            repository: "default".to_string(),
        }
    }
}

/// A request to apply one action to every document matched by a query
///
/// `id` and `submitted_at` are assigned by `BulkService::submit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkCommand {
    pub id: Uuid,
    pub action: String,
    pub query: String,
    pub target: ExecutionTarget,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    /// Overrides the action and configured bucket size
    #[serde(default)]
    pub bucket_size: Option<usize>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl BulkCommand {
    pub fn new(action: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: Uuid::nil(),
            action: action.into(),
            query: query.into(),
            target: ExecutionTarget::default(),
            params: HashMap::new(),
            bucket_size: None,
            submitted_at: None,
        }
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.target.principal = principal.into();
        self
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.target.repository = repository.into();
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_bucket_size(mut self, bucket_size: usize) -> Self {
        self.bucket_size = Some(bucket_size);
        self
    }

    pub fn param(&self, name: &str) -> Option<&serde_json::Value> {
        self.params.get(name)
    }
}

/// One bucket of document ids published to an action stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRecord {
    pub command_id: Uuid,
    /// Position of the bucket in scroll order, starting at 0
    pub bucket_index: u64,
    pub ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let command = BulkCommand::new("legal_hold", "SELECT * FROM Document")
            .with_principal("alice")
            .with_param("description", "litigation 42")
            .with_bucket_size(10);

        assert!(command.id.is_nil());
        assert_eq!(command.target.principal, "alice");
        assert_eq!(command.target.repository, "default");
        assert_eq!(command.param("description").unwrap(), "litigation 42");
        assert_eq!(command.bucket_size, Some(10));
    }

    #[test]
    fn test_missing_optional_fields_deserialize() {
        let command: BulkCommand = serde_json::from_value(serde_json::json!({
            "id": Uuid::nil(),
            "action": "set_properties",
            "query": "SELECT * FROM Document",
            "target": {"principal": "bob", "repository": "default"}
        }))
        .unwrap();
        assert!(command.params.is_empty());
        assert_eq!(command.bucket_size, None);
    }
}
