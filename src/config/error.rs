//! Configuration Error Types
//!
//! Errors raised while loading, merging and validating monitor configuration.
//! Any of these at startup is fatal: the pipeline refuses to start.

use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Invalid TOML syntax in configuration file
    #[error("Invalid TOML syntax in '{file_path}': {error}")]
    InvalidToml { file_path: String, error: String },

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

    /// Configuration merging errors
    #[error("Failed to merge configuration sources: {error}")]
    ConfigMergeError { error: String },

    /// File I/O errors during configuration loading
    #[error("Failed to read configuration file '{file_path}': {error}")]
    FileReadError { file_path: String, error: String },
}

impl ConfigurationError {
    /// Create a missing required field error
    pub fn missing_required_field<F: Into<String>, C: Into<String>>(field: F, context: C) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value<F: Into<String>, V: Into<String>, C: Into<String>>(
        field: F,
        value: V,
        context: C,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }

    /// Create a file read error
    pub fn file_read_error<P: Into<String>, E: std::fmt::Display>(file_path: P, error: E) -> Self {
        Self::FileReadError {
            file_path: file_path.into(),
            error: error.to_string(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::FileParse { uri, cause } => Self::InvalidToml {
                file_path: uri.unwrap_or_else(|| "<inline>".to_string()),
                error: cause.to_string(),
            },
            config::ConfigError::Foreign(cause) => Self::FileReadError {
                file_path: "<unknown>".to_string(),
                error: cause.to_string(),
            },
            other => Self::ConfigMergeError {
                error: other.to_string(),
            },
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigurationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helper_constructors() {
        let err = ConfigurationError::invalid_value("cache.vitals_capacity", "0", "must be > 0");
        assert_eq!(
            err.to_string(),
            "Invalid value '0' for field 'cache.vitals_capacity': must be > 0"
        );

        let err = ConfigurationError::missing_required_field("device.device_id", "device section");
        assert!(err.to_string().contains("device.device_id"));
    }

    #[test]
    fn test_config_crate_errors_convert() {
        let err: ConfigurationError = config::ConfigError::Message("bad merge".to_string()).into();
        assert!(matches!(err, ConfigurationError::ConfigMergeError { .. }));
    }
}
