//! MSU study configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for study.json
//! - Config resolution (CLI → env → XDG → system → defaults)
//! - Environment overrides for endpoint credentials
//! - Semantic validation

pub mod resolve;
pub mod study;
pub mod validate;

pub use resolve::{load_config, resolve_config, ConfigPaths, ConfigSource, ResolvedConfig};
pub use study::{EndpointConfig, ReportingConfig, StorageConfig, StudyConfig};
pub use validate::{validate_config, validate_reporting, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
