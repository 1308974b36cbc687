//! Configuration validation errors and semantic validation.

use thiserror::Error;

use crate::study::StudyConfig;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 60,
            ValidationError::ParseError(_) => 61,
            ValidationError::MissingField(_) => 64,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
        }
    }
}

/// Validate a study configuration semantically.
pub fn validate_config(config: &StudyConfig) -> ValidationResult<()> {
    if config.schema_version != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: config.schema_version.clone(),
        });
    }

    if let Some(url) = &config.endpoint.base_url {
        validate_base_url(url)?;
    }

    positive("endpoint.timeout_secs", config.endpoint.timeout_secs)?;
    positive("reporting.interval_secs", config.reporting.interval_secs)?;
    positive(
        "reporting.in_flight_timeout_secs",
        config.reporting.in_flight_timeout_secs,
    )?;
    positive("storage.lock_timeout_ms", config.storage.lock_timeout_ms)?;

    // A run still inside its request timeout must never look stale.
    if config.reporting.in_flight_timeout_secs <= config.endpoint.timeout_secs {
        return Err(ValidationError::InvalidValue {
            field: "reporting.in_flight_timeout_secs".to_string(),
            message: format!(
                "Must exceed endpoint.timeout_secs ({}), got {}",
                config.endpoint.timeout_secs, config.reporting.in_flight_timeout_secs
            ),
        });
    }

    Ok(())
}

/// Validate that the endpoint is complete enough to send reports.
pub fn validate_reporting(config: &StudyConfig) -> ValidationResult<()> {
    let endpoint = &config.endpoint;
    match &endpoint.base_url {
        Some(url) => validate_base_url(url)?,
        None => return Err(ValidationError::MissingField("endpoint.base_url".to_string())),
    }
    if endpoint.username.as_deref().map_or(true, str::is_empty) {
        return Err(ValidationError::MissingField("endpoint.username".to_string()));
    }
    if endpoint.password.is_none() {
        return Err(ValidationError::MissingField("endpoint.password".to_string()));
    }
    Ok(())
}

fn validate_base_url(url: &str) -> ValidationResult<()> {
    let has_scheme = url.starts_with("http://") || url.starts_with("https://");
    let host = url.split("://").nth(1).unwrap_or("");
    if !has_scheme || host.is_empty() {
        return Err(ValidationError::InvalidValue {
            field: "endpoint.base_url".to_string(),
            message: format!("Must be an http(s) URL, got {:?}", url),
        });
    }
    Ok(())
}

fn positive(field: &str, value: u64) -> ValidationResult<()> {
    if value == 0 {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            message: "Must be positive, got 0".to_string(),
        });
    }
    Ok(())
}
