//! Configuration Error Types
//!
//! Specific, actionable errors for configuration loading and validation.

use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Source files could not be read or merged
    #[error("Failed to load configuration from {source_description}: {error}")]
    LoadError {
        source_description: String,
        error: String,
    },

    /// Merged sources did not match the expected shape
    #[error("Invalid configuration structure: {0}")]
    InvalidStructure(String),

    /// Missing required configuration field
    #[error("Missing required configuration field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },
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

    pub fn missing_required_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::Foreign(e) => Self::LoadError {
                source_description: "configuration source".to_string(),
                error: e.to_string(),
            },
            other => Self::InvalidStructure(other.to_string()),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
