//! Errors raised while loading or validating `TaskerConfig`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Failed to read configuration file '{file_path}': {error}")]
    FileReadError { file_path: String, error: String },

    /// TOML syntax or shape mismatch; `file_path` is `<inline>` for string sources
    #[error("Invalid TOML in '{file_path}': {error}")]
    InvalidToml { file_path: String, error: String },

    /// A single field rejected by a cross-section consistency check
    #[error("Invalid value '{value}' for '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// Field-level validation failures reported by `validator`
    #[error("Configuration validation failed: {error}")]
    ValidationError { error: String },
}

impl ConfigurationError {
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl ToString,
        context: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            context: context.into(),
        }
    }

    pub fn validation_error(error: impl std::fmt::Display) -> Self {
        Self::ValidationError {
            error: error.to_string(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
