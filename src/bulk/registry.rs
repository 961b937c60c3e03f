//! # Action Registry
//!
//! Explicit registry of the bulk actions a service can run. Each action is
//! described by an [`ActionDescriptor`]: its factory, declared parameters and
//! per-action tuning. The registry validates commands against these
//! descriptors before they are accepted.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use super::action::{BulkAction, ParameterSpec};
use super::actions::{LegalHoldAction, SetPropertiesAction};
use super::command::BulkCommand;
use super::errors::BulkError;

/// Builds a fresh action instance per action computation partition
pub type ActionFactory = Arc<dyn Fn() -> Box<dyn BulkAction> + Send + Sync>;

/// Extra command checks beyond declared parameters
pub type CommandValidator = fn(&BulkCommand) -> Result<(), BulkError>;

/// Names taken by the pipeline's own streams and computations
const RESERVED_NAMES: &[&str] = &["command", "status", "scroller"];

#[derive(Clone)]
pub struct ActionDescriptor {
    name: String,
    factory: ActionFactory,
    parameters: Vec<ParameterSpec>,
    bucket_size: Option<usize>,
    concurrency: Option<usize>,
    allow_undeclared_parameters: bool,
    validator: Option<CommandValidator>,
}

impl ActionDescriptor {
    pub fn new(name: impl Into<String>, factory: ActionFactory) -> Self {
        Self {
            name: name.into(),
            factory,
            parameters: Vec::new(),
            bucket_size: None,
            concurrency: None,
            allow_undeclared_parameters: false,
            validator: None,
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Default bucket size for commands of this action
    pub fn with_bucket_size(mut self, bucket_size: usize) -> Self {
        self.bucket_size = Some(bucket_size);
        self
    }

    /// Instances of the action computation
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Accept parameters that are not declared
    pub fn allow_undeclared_parameters(mut self) -> Self {
        self.allow_undeclared_parameters = true;
        self
    }

    pub fn with_validator(mut self, validator: CommandValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn bucket_size(&self) -> Option<usize> {
        self.bucket_size
    }

    pub fn concurrency(&self) -> Option<usize> {
        self.concurrency
    }

    pub fn factory(&self) -> ActionFactory {
        Arc::clone(&self.factory)
    }

    pub fn create(&self) -> Box<dyn BulkAction> {
        (self.factory)()
    }

    fn validate(&self, command: &BulkCommand) -> Result<(), BulkError> {
        for spec in &self.parameters {
            match command.params.get(&spec.name) {
                None | Some(serde_json::Value::Null) if spec.required => {
                    return Err(BulkError::invalid_command(
                        &spec.name,
                        format!("required by action {}", self.name),
                    ));
                }
                None | Some(serde_json::Value::Null) => {}
                Some(value) if !spec.kind.matches(value) => {
                    return Err(BulkError::invalid_command(
                        &spec.name,
                        format!("expected {}, got {value}", spec.kind),
                    ));
                }
                Some(_) => {}
            }
        }

        if !self.allow_undeclared_parameters {
            if let Some(undeclared) = command
                .params
                .keys()
                .find(|name| !self.parameters.iter().any(|spec| &spec.name == *name))
            {
                return Err(BulkError::invalid_command(
                    undeclared,
                    format!("not accepted by action {}", self.name),
                ));
            }
        }

        match self.validator {
            Some(validator) => validator(command),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ActionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDescriptor")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("bucket_size", &self.bucket_size)
            .field("concurrency", &self.concurrency)
            .field("allow_undeclared_parameters", &self.allow_undeclared_parameters)
            .finish()
    }
}

/// Registered bulk actions by name
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, ActionDescriptor>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `set_properties` and `legal_hold`
    pub fn with_builtin_actions() -> Self {
        let mut registry = Self::new();
        for descriptor in [SetPropertiesAction::descriptor(), LegalHoldAction::descriptor()] {
            registry.actions.insert(descriptor.name.clone(), descriptor);
        }
        registry
    }

    pub fn register(&mut self, descriptor: ActionDescriptor) -> Result<(), BulkError> {
        validate_action_name(&descriptor.name)?;
        if self.actions.contains_key(&descriptor.name) {
            return Err(BulkError::DuplicateAction(descriptor.name));
        }
        info!(
            action = %descriptor.name,
            parameters = descriptor.parameters.len(),
            "Registered bulk action"
        );
        self.actions.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ActionDescriptor> {
        self.actions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.actions.keys().map(String::as_str).collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ActionDescriptor> {
        self.actions.values()
    }

    /// Check the action exists and the parameters satisfy its declaration
    pub fn validate(&self, command: &BulkCommand) -> Result<&ActionDescriptor, BulkError> {
        let descriptor = self.get(&command.action).ok_or_else(|| {
            BulkError::invalid_command("action", format!("unknown action {}", command.action))
        })?;
        descriptor.validate(command)?;
        Ok(descriptor)
    }
}

fn validate_action_name(name: &str) -> Result<(), BulkError> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if RESERVED_NAMES.contains(&name) {
        Some("reserved by the bulk pipeline")
    } else if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        Some("only lowercase letters, digits, '_' and '-' are allowed")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(BulkError::InvalidActionName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::action::{ActionParams, ActionSession, ParameterKind, RecordOutcome};
    use crate::bulk::errors::ActionError;
    use async_trait::async_trait;
    use serde_json::json;

    struct Noop;

    #[async_trait]
    impl BulkAction for Noop {
        async fn compute_record(
            &mut self,
            _session: &mut ActionSession,
            _id: &str,
            _params: &ActionParams,
        ) -> Result<RecordOutcome, ActionError> {
            Ok(RecordOutcome::Processed)
        }
    }

    fn noop(name: &str) -> ActionDescriptor {
        ActionDescriptor::new(name, Arc::new(|| Box::new(Noop) as Box<dyn BulkAction>))
            .with_parameter(ParameterSpec::required("label", ParameterKind::String))
            .with_parameter(ParameterSpec::optional("limit", ParameterKind::Integer))
    }

    fn command(params: serde_json::Value) -> BulkCommand {
        let mut command = BulkCommand::new("noop", "SELECT * FROM Document");
        if let serde_json::Value::Object(map) = params {
            command.params = map.into_iter().collect();
        }
        command
    }

    #[test]
    fn test_register_rejects_duplicates_and_bad_names() {
        let mut registry = ActionRegistry::new();
        registry.register(noop("noop")).unwrap();
        assert_eq!(
            registry.register(noop("noop")),
            Err(BulkError::DuplicateAction("noop".to_string()))
        );
        for bad in ["", "status", "Upper", "has space"] {
            assert!(matches!(
                registry.register(noop(bad)),
                Err(BulkError::InvalidActionName { .. })
            ));
        }
        assert_eq!(registry.names(), vec!["noop"]);
    }

    #[test]
    fn test_validate_parameters() {
        let mut registry = ActionRegistry::new();
        registry.register(noop("noop")).unwrap();

        assert!(registry.validate(&command(json!({"label": "x"}))).is_ok());
        assert!(registry.validate(&command(json!({"label": "x", "limit": 3}))).is_ok());

        let missing = registry.validate(&command(json!({}))).unwrap_err();
        assert!(matches!(missing, BulkError::InvalidCommand { ref parameter, .. } if parameter == "label"));

        let mistyped = registry
            .validate(&command(json!({"label": "x", "limit": "many"})))
            .unwrap_err();
        assert!(matches!(mistyped, BulkError::InvalidCommand { ref parameter, .. } if parameter == "limit"));

        let undeclared = registry
            .validate(&command(json!({"label": "x", "color": "red"})))
            .unwrap_err();
        assert!(matches!(undeclared, BulkError::InvalidCommand { ref parameter, .. } if parameter == "color"));

        let mut unknown = command(json!({"label": "x"}));
        unknown.action = "missing".to_string();
        assert!(matches!(
            registry.validate(&unknown),
            Err(BulkError::InvalidCommand { ref parameter, .. }) if parameter == "action"
        ));
    }

    #[test]
    fn test_builtin_actions() {
        let registry = ActionRegistry::with_builtin_actions();
        assert!(registry.contains("set_properties"));
        assert!(registry.contains("legal_hold"));
    }
}
