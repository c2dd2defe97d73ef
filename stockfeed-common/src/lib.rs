//! Stockfeed Common - configuration, validation, and logging shared by the
//! stockfeed ingestion service.
//!
//! This crate provides:
//! - Configuration types and loading (`~/.stockfeed/config.json` + env overrides)
//! - Configuration validation
//! - Logging setup with noise filtering

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;
pub mod validation;

pub use config::{
    Config, IngestConfig, ObservabilityConfig, RotationConfig, SourceConfig, StorageConfig,
};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::{Config, IngestConfig, RotationConfig};
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
