//! Configuration validation for stockfeed.
//!
//! Each configuration section implements [`Validate`]; [`Config::validate`]
//! collects every section's error instead of stopping at the first one.

use thiserror::Error;

use crate::config::{Config, IngestConfig, ObservabilityConfig, RotationConfig, SourceConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let results = [
            self.observability.validate(),
            self.source.validate(),
            self.ingest.validate(),
            self.rotation.validate(),
            self.validate_entities(),
        ];

        let mut errors: Vec<ValidationError> =
            results.into_iter().filter_map(Result::err).collect();

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    fn validate_entities(&self) -> ValidationResult<()> {
        if let Some(bad) = self.entities.iter().find(|code| code.trim().is_empty()) {
            return Err(ValidationError::InvalidValue {
                field: "entities".into(),
                reason: format!("empty stock code {bad:?}"),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

impl Validate for SourceConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.kline_url.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "source.kline_url".into(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "source.request_timeout_secs".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

impl Validate for IngestConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.escalation_threshold == 0 {
            return Err(ValidationError::InvalidValue {
                field: "ingest.escalation_threshold".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.max_attempts_per_entity == 0 {
            return Err(ValidationError::InvalidValue {
                field: "ingest.max_attempts_per_entity".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

impl Validate for RotationConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.max_attempts == 0 {
            return Err(ValidationError::InvalidValue {
                field: "rotation.max_attempts".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.registry_capacity == 0 {
            return Err(ValidationError::InvalidValue {
                field: "rotation.registry_capacity".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "rotation.timeout_secs".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if self.command.is_some() && self.probe_url.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "rotation.probe_url".into(),
            });
        }
        Ok(())
    }
}
