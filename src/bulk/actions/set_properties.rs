//! `set_properties`: write every command parameter as a document property

use std::sync::Arc;

use async_trait::async_trait;

use super::permissions;
use crate::bulk::action::{ActionParams, ActionSession, BulkAction, RecordOutcome};
use crate::bulk::command::BulkCommand;
use crate::bulk::errors::{ActionError, BulkError};
use crate::bulk::registry::ActionDescriptor;

pub const ACTION_NAME: &str = "set_properties";

#[derive(Debug, Default)]
pub struct SetPropertiesAction;

impl SetPropertiesAction {
    pub fn descriptor() -> ActionDescriptor {
        ActionDescriptor::new(
            ACTION_NAME,
            Arc::new(|| Box::new(SetPropertiesAction) as Box<dyn BulkAction>),
        )
        .allow_undeclared_parameters()
        .with_validator(require_properties)
    }
}

fn require_properties(command: &BulkCommand) -> Result<(), BulkError> {
    if command.params.is_empty() {
        return Err(BulkError::invalid_command(
            "params",
            "at least one property must be given",
        ));
    }
    Ok(())
}

#[async_trait]
impl BulkAction for SetPropertiesAction {
    async fn compute_record(
        &mut self,
        session: &mut ActionSession,
        id: &str,
        params: &ActionParams,
    ) -> Result<RecordOutcome, ActionError> {
        if !session.exists(id).await? {
            return Ok(RecordOutcome::Skipped("document no longer exists".to_string()));
        }
        if !session
            .can_perform(&[id.to_string()], permissions::WRITE)
            .await
        {
            return Ok(RecordOutcome::Skipped(format!(
                "{} lacks {}",
                session.principal(),
                permissions::WRITE
            )));
        }

        for (name, value) in params {
            session.set_property(id, name, value.clone()).await?;
        }
        Ok(RecordOutcome::Processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::command::ExecutionTarget;
    use crate::bulk::repository::{Document, InMemoryRepository, Repository, StaticPermissions};
    use serde_json::json;

    #[test]
    fn test_empty_params_are_rejected() {
        let command = BulkCommand::new(ACTION_NAME, "SELECT * FROM Document");
        assert!(matches!(
            require_properties(&command),
            Err(BulkError::InvalidCommand { .. })
        ));
    }

    #[tokio::test]
    async fn test_sets_properties_and_skips_denied() {
        let repository = InMemoryRepository::default();
        repository.insert("a", Document::new());
        repository.insert("b", Document::new());

        let permissions = Arc::new(StaticPermissions::allow_all().deny("system", "b"));
        let session = repository
            .open_session(&ExecutionTarget::default())
            .await
            .unwrap();
        let mut session = ActionSession::new("system", session, permissions);

        let params: ActionParams = [("dc:title".to_string(), json!("Renamed"))].into();
        let ids = vec!["a".to_string(), "b".to_string(), "gone".to_string()];
        let outcome = SetPropertiesAction.compute(&mut session, &ids, &params).await;
        session.commit().await.unwrap();

        assert_eq!(outcome.processed, 3);
        assert_eq!(outcome.skipped, 2);
        assert!(outcome.errors.is_empty());
        assert_eq!(repository.property("a", "dc:title"), Some(json!("Renamed")));
        assert_eq!(repository.property("b", "dc:title"), None);
    }
}
