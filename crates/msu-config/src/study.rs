//! Study configuration types.
//!
//! These types match the study.json layout.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::validate::ValidationError;

/// Environment variable names for runtime overrides.
pub const ENV_API_URL: &str = "MSU_STUDY_API_URL";
pub const ENV_USER: &str = "MSU_STUDY_USER";
pub const ENV_PASSWORD: &str = "MSU_STUDY_PASSWORD";
pub const ENV_DATA_DIR: &str = "MSU_STUDY_DATA_DIR";

/// Directory name under the platform data dir.
const DATA_DIR_NAME: &str = "msu_study";

/// Complete study configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyConfig {
    pub schema_version: String,

    #[serde(default)]
    pub endpoint: EndpointConfig,

    #[serde(default)]
    pub reporting: ReportingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub notes: Option<String>,
}

/// Collection endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Base URL; reports are POSTed to `<base_url>/data_point`.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Basic auth user.
    #[serde(default)]
    pub username: Option<String>,

    /// Basic auth password.
    #[serde(default)]
    pub password: Option<String>,

    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            username: None,
            password: None,
            timeout_secs: 30,
        }
    }
}

/// Report scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    /// Interval between scheduled report triggers.
    pub interval_secs: u64,

    /// Age after which an in-flight report run may be reclaimed.
    pub in_flight_timeout_secs: u64,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            in_flight_timeout_secs: 120,
        }
    }
}

/// Durable storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the study state file.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// How long a writer waits for the state lock.
    pub lock_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            lock_timeout_ms: 2000,
        }
    }
}

impl StorageConfig {
    /// Configured data dir, or the platform default.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }
}

/// Default data directory (`$XDG_DATA_HOME/msu_study` or platform equivalent).
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            endpoint: EndpointConfig::default(),
            reporting: ReportingConfig::default(),
            storage: StorageConfig::default(),
            notes: None,
        }
    }
}

impl StudyConfig {
    /// Load config from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValidationError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::parse_json(&content)
    }

    /// Parse config from a JSON string.
    pub fn parse_json(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json)
            .map_err(|e| ValidationError::ParseError(format!("Invalid JSON: {}", e)))
    }

    /// Apply `MSU_STUDY_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (testable without touching env).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty(ENV_API_URL) {
            self.endpoint.base_url = Some(url);
        }
        if let Some(user) = non_empty(ENV_USER) {
            self.endpoint.username = Some(user);
        }
        if let Some(password) = non_empty(ENV_PASSWORD) {
            self.endpoint.password = Some(password);
        }
        if let Some(dir) = non_empty(ENV_DATA_DIR) {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = StudyConfig::default();
        assert_eq!(config.schema_version, crate::CONFIG_SCHEMA_VERSION);
        assert!(config.endpoint.base_url.is_none());
        assert_eq!(config.endpoint.timeout_secs, 30);
        assert_eq!(config.reporting.interval_secs, 3600);
        assert_eq!(config.storage.lock_timeout_ms, 2000);
    }

    #[test]
    fn test_parse_minimal_json() {
        let config = StudyConfig::parse_json(r#"{"schema_version": "1.0.0"}"#).unwrap();
        assert_eq!(config.reporting.in_flight_timeout_secs, 120);
        assert!(config.storage.data_dir.is_none());
    }

    #[test]
    fn test_parse_full_json() {
        let json = r#"{
            "schema_version": "1.0.0",
            "endpoint": {
                "base_url": "https://collect.example.org/api",
                "username": "ext",
                "password": "secret",
                "timeout_secs": 10
            },
            "reporting": { "interval_secs": 600, "in_flight_timeout_secs": 60 },
            "storage": { "data_dir": "/tmp/msu", "lock_timeout_ms": 500 }
        }"#;
        let config = StudyConfig::parse_json(json).unwrap();
        assert_eq!(
            config.endpoint.base_url.as_deref(),
            Some("https://collect.example.org/api")
        );
        assert_eq!(config.endpoint.timeout_secs, 10);
        assert_eq!(config.reporting.interval_secs, 600);
        assert_eq!(config.storage.resolved_data_dir(), PathBuf::from("/tmp/msu"));
    }

    #[test]
    fn test_partial_sections_use_defaults() {
        let json = r#"{"schema_version": "1.0.0", "endpoint": {"base_url": "http://x"}}"#;
        let config = StudyConfig::parse_json(json).unwrap();
        assert_eq!(config.endpoint.timeout_secs, 30);
        assert!(config.endpoint.username.is_none());
    }

    #[test]
    fn test_parse_invalid_json() {
        let err = StudyConfig::parse_json("{not json").unwrap_err();
        assert!(matches!(err, ValidationError::ParseError(_)));
    }

    #[test]
    fn test_overrides_replace_values() {
        let env: HashMap<&str, &str> = [
            (ENV_API_URL, "http://127.0.0.1:9000"),
            (ENV_USER, "alice"),
            (ENV_PASSWORD, "pw"),
            (ENV_DATA_DIR, "/var/lib/msu"),
        ]
        .into_iter()
        .collect();

        let mut config = StudyConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(
            config.endpoint.base_url.as_deref(),
            Some("http://127.0.0.1:9000")
        );
        assert_eq!(config.endpoint.username.as_deref(), Some("alice"));
        assert_eq!(config.endpoint.password.as_deref(), Some("pw"));
        assert_eq!(config.storage.data_dir, Some(PathBuf::from("/var/lib/msu")));
    }

    #[test]
    fn test_blank_overrides_ignored() {
        let mut config = StudyConfig::default();
        config.endpoint.username = Some("kept".to_string());
        config.apply_overrides(|k| (k == ENV_USER).then(|| "  ".to_string()));
        assert_eq!(config.endpoint.username.as_deref(), Some("kept"));
    }
}
