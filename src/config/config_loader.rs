//! Simple configuration loader
//!
//! 0. Loads a `.env` file if present (via dotenvy)
//! 1. Reads one TOML file from `TASKER_CONFIG_PATH` or an explicit path
//! 2. Substitutes `${VAR}` and `${VAR:-default}` placeholders
//! 3. Deserializes to [`TaskerConfig`]
//! 4. Validates with the validator library and cross-field checks

use std::path::Path;
use validator::Validate;

use super::error::{ConfigResult, ConfigurationError};
use super::tasker::TaskerConfig;

/// Zero-state configuration loader
#[derive(Debug)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the `TASKER_CONFIG_PATH` environment variable
    ///
    /// Falls back to defaults when the variable is unset.
    pub fn load_from_env() -> ConfigResult<TaskerConfig> {
        dotenvy::dotenv().ok();

        let environment = crate::logging::get_environment();
        match std::env::var("TASKER_CONFIG_PATH") {
            Ok(config_path) => {
                tracing::info!(
                    config_path = %config_path,
                    environment = %environment,
                    "Loading configuration from TASKER_CONFIG_PATH"
                );
                Self::load_from_path(Path::new(&config_path))
            }
            Err(_) => {
                tracing::info!(
                    environment = %environment,
                    "TASKER_CONFIG_PATH not set - using default configuration"
                );
                let config = TaskerConfig::default();
                Self::validate(&config)?;
                Ok(config)
            }
        }
    }

    /// Load configuration from a specific file path
    pub fn load_from_path(path: &Path) -> ConfigResult<TaskerConfig> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigurationError::FileReadError {
                file_path: path.display().to_string(),
                error: e.to_string(),
            })?;

        let config = Self::load_from_str(&contents).map_err(|e| match e {
            ConfigurationError::InvalidToml { error, .. } => ConfigurationError::InvalidToml {
                file_path: path.display().to_string(),
                error,
            },
            other => other,
        })?;

        tracing::info!(path = %path.display(), "Configuration loaded successfully");
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn load_from_str(contents: &str) -> ConfigResult<TaskerConfig> {
        let substituted = Self::substitute_env_vars(contents);

        let config: TaskerConfig =
            toml::from_str(&substituted).map_err(|e| ConfigurationError::InvalidToml {
                file_path: "<inline>".to_string(),
                error: e.to_string(),
            })?;

        Self::validate(&config)?;
        tracing::debug!("Successfully parsed and validated TaskerConfig");
        Ok(config)
    }

    fn validate(config: &TaskerConfig) -> ConfigResult<()> {
        config
            .validate()
            .map_err(ConfigurationError::validation_error)?;
        config.validate_consistency()
    }

    /// Escape TOML special characters so substituted values stay inside their string literal
    fn escape_toml_string(value: &str) -> String {
        value
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('\n', "\\n")
            .replace('\r', "\\r")
            .replace('\t', "\\t")
    }

    /// Replace `${VAR}` and `${VAR:-default}` with environment values
    ///
    /// Unknown variables without a default are left untouched so that TOML
    /// parsing reports them in context.
    fn substitute_env_vars(content: &str) -> String {
        let mut result = String::with_capacity(content.len());
        let mut rest = content;

        while let Some(start) = rest.find("${") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];

            let Some(end) = after.find('}') else {
                result.push_str(&rest[start..]);
                return result;
            };

            let expr = &after[..end];
            let (var_name, default_value) = match expr.find(":-") {
                Some(pos) => (&expr[..pos], Some(&expr[pos + 2..])),
                None => (expr, None),
            };

            match (std::env::var(var_name), default_value) {
                (Ok(value), _) => result.push_str(&Self::escape_toml_string(&value)),
                (Err(_), Some(default)) => result.push_str(default),
                (Err(_), None) => {
                    tracing::warn!(variable = %var_name, "Unresolved configuration placeholder");
                    result.push_str(&rest[start..start + 2 + end + 1]);
                }
            }

            rest = &after[end + 1..];
        }

        result.push_str(rest);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_uses_default_when_unset() {
        let out = ConfigLoader::substitute_env_vars(
            "key_prefix = \"${TASKER_TEST_UNSET_PREFIX_VAR:-spill:}\"",
        );
        assert_eq!(out, "key_prefix = \"spill:\"");
    }

    #[test]
    fn test_substitute_leaves_unknown_placeholder() {
        let input = "value = \"${TASKER_TEST_DEFINITELY_UNSET}\"";
        assert_eq!(ConfigLoader::substitute_env_vars(input), input);
    }

    #[test]
    fn test_escape_toml_string() {
        assert_eq!(ConfigLoader::escape_toml_string("a\"b\\c"), "a\\\"b\\\\c");
    }

    #[test]
    fn test_load_from_str_partial_sections() {
        let config = ConfigLoader::load_from_str(
            r#"
            [bulk]
            default_bucket_size = 50

            [scheduler.categories.renditions]
            max_concurrency = 1
            queue_capacity = 16
            "#,
        )
        .unwrap();

        assert_eq!(config.bulk.default_bucket_size, 50);
        assert_eq!(config.scheduler.category("renditions").max_concurrency, 1);
        assert_eq!(config.topology, crate::config::TopologyConfig::default());
    }

    #[test]
    fn test_load_from_str_rejects_invalid_values() {
        let result = ConfigLoader::load_from_str("[topology]\ndefault_concurrency = 0\n");
        assert!(matches!(
            result,
            Err(ConfigurationError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_load_from_str_rejects_bad_toml() {
        let result = ConfigLoader::load_from_str("[bulk\n");
        assert!(matches!(result, Err(ConfigurationError::InvalidToml { .. })));
    }
}
