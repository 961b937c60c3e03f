//! `legal_hold`: place or lift a legal hold on documents
//!
//! Parameters: `description` (string, required) and `hold` (boolean,
//! defaults to true). Both are read once per bucket.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::permissions;
use crate::bulk::action::{
    ActionParams, ActionSession, BulkAction, ParameterKind, ParameterSpec, RecordOutcome,
};
use crate::bulk::command::BulkCommand;
use crate::bulk::errors::ActionError;
use crate::bulk::registry::ActionDescriptor;

pub const ACTION_NAME: &str = "legal_hold";
pub const PARAM_DESCRIPTION: &str = "description";
pub const PARAM_HOLD: &str = "hold";

pub const PROPERTY_HOLD: &str = "legal_hold";
pub const PROPERTY_DESCRIPTION: &str = "legal_hold_description";

#[derive(Debug, Default)]
pub struct LegalHoldAction {
    description: String,
    hold: bool,
}

impl LegalHoldAction {
    pub fn descriptor() -> ActionDescriptor {
        ActionDescriptor::new(
            ACTION_NAME,
            Arc::new(|| Box::new(LegalHoldAction::default()) as Box<dyn BulkAction>),
        )
        .with_parameter(ParameterSpec::required(PARAM_DESCRIPTION, ParameterKind::String))
        .with_parameter(ParameterSpec::optional(PARAM_HOLD, ParameterKind::Boolean))
    }
}

#[async_trait]
impl BulkAction for LegalHoldAction {
    async fn start_bucket(&mut self, command: &BulkCommand) -> Result<(), ActionError> {
        self.description = command
            .param(PARAM_DESCRIPTION)
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::InvalidParameter {
                parameter: PARAM_DESCRIPTION.to_string(),
                reason: "missing".to_string(),
            })?
            .to_string();
        self.hold = command
            .param(PARAM_HOLD)
            .and_then(Value::as_bool)
            .unwrap_or(true);
        Ok(())
    }

    async fn compute_record(
        &mut self,
        session: &mut ActionSession,
        id: &str,
        _params: &ActionParams,
    ) -> Result<RecordOutcome, ActionError> {
        if !session.exists(id).await? {
            return Ok(RecordOutcome::Skipped("document no longer exists".to_string()));
        }
        if !session
            .can_perform(&[id.to_string()], permissions::MANAGE_LEGAL_HOLD)
            .await
        {
            return Ok(RecordOutcome::Skipped(format!(
                "{} lacks {}",
                session.principal(),
                permissions::MANAGE_LEGAL_HOLD
            )));
        }

        session
            .set_property(id, PROPERTY_HOLD, Value::Bool(self.hold))
            .await?;
        session
            .set_property(id, PROPERTY_DESCRIPTION, Value::String(self.description.clone()))
            .await?;
        Ok(RecordOutcome::Processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::command::ExecutionTarget;
    use crate::bulk::repository::{Document, InMemoryRepository, Repository, StaticPermissions};
    use serde_json::json;

    #[tokio::test]
    async fn test_start_bucket_caches_parameters() {
        let mut action = LegalHoldAction::default();
        let command = BulkCommand::new(ACTION_NAME, "SELECT * FROM Document")
            .with_param(PARAM_DESCRIPTION, "case 7")
            .with_param(PARAM_HOLD, false);
        action.start_bucket(&command).await.unwrap();
        assert_eq!(action.description, "case 7");
        assert!(!action.hold);

        let missing = BulkCommand::new(ACTION_NAME, "SELECT * FROM Document");
        assert!(action.start_bucket(&missing).await.is_err());
    }

    #[tokio::test]
    async fn test_places_hold() {
        let repository = InMemoryRepository::default();
        repository.insert("a", Document::new());
        let session = repository
            .open_session(&ExecutionTarget::default())
            .await
            .unwrap();
        let mut session = ActionSession::new("system", session, Arc::new(StaticPermissions::allow_all()));

        let mut action = LegalHoldAction::default();
        let command = BulkCommand::new(ACTION_NAME, "SELECT * FROM Document")
            .with_param(PARAM_DESCRIPTION, "case 7");
        action.start_bucket(&command).await.unwrap();
        let outcome = action
            .compute(&mut session, &["a".to_string()], &command.params)
            .await;
        session.commit().await.unwrap();

        assert_eq!(outcome.processed, 1);
        assert_eq!(repository.property("a", PROPERTY_HOLD), Some(json!(true)));
        assert_eq!(repository.property("a", PROPERTY_DESCRIPTION), Some(json!("case 7")));
    }
}
