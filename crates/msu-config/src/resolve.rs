//! Configuration resolution and path discovery.
//!
//! Resolution order: CLI argument → environment variables → XDG paths →
//! system config → defaults.

use std::path::{Path, PathBuf};

use crate::study::StudyConfig;
use crate::validate::{validate_config, ValidationResult};

/// Discovered configuration file path.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    /// Path to study.json (or None if not found).
    pub study: Option<PathBuf>,

    /// Source of the study config (for diagnostics).
    pub study_source: ConfigSource,
}

/// Where a configuration file was found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Found in XDG config directory.
    XdgConfig,

    /// Found in /etc/msu-study/.
    SystemConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::SystemConfig => write!(f, "system config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Loaded configuration with provenance.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: StudyConfig,
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

/// Environment variable names.
const ENV_CONFIG_PATH: &str = "MSU_STUDY_CONFIG";
const ENV_CONFIG_DIR: &str = "MSU_STUDY_CONFIG_DIR";

/// Standard config file name.
const STUDY_FILENAME: &str = "study.json";

/// Application name for XDG directories.
const APP_NAME: &str = "msu-study";

/// Resolve the study configuration path.
///
/// 1. Explicit CLI path (if it exists)
/// 2. MSU_STUDY_CONFIG (direct path)
/// 3. MSU_STUDY_CONFIG_DIR + study.json
/// 4. XDG config directory (~/.config/msu-study/)
/// 5. System config (/etc/msu-study/)
/// 6. Built-in defaults (None)
pub fn resolve_config(cli_path: Option<&Path>) -> ConfigPaths {
    let mut paths = ConfigPaths::default();

    // 1. CLI argument
    if let Some(path) = cli_path {
        if path.exists() {
            paths.study = Some(path.to_path_buf());
            paths.study_source = ConfigSource::CliArgument;
            return paths;
        }
    }

    // 2. Environment variable (direct path)
    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            paths.study = Some(path);
            paths.study_source = ConfigSource::Environment;
            return paths;
        }
    }

    // 3. Environment variable (config dir)
    if let Ok(config_dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = PathBuf::from(config_dir).join(STUDY_FILENAME);
        if path.exists() {
            paths.study = Some(path);
            paths.study_source = ConfigSource::Environment;
            return paths;
        }
    }

    // 4. XDG config directory
    if let Some(dir) = xdg_config_dir() {
        let path = dir.join(STUDY_FILENAME);
        if path.exists() {
            paths.study = Some(path);
            paths.study_source = ConfigSource::XdgConfig;
            return paths;
        }
    }

    // 5. System config
    let system_path = system_config_dir().join(STUDY_FILENAME);
    if system_path.exists() {
        paths.study = Some(system_path);
        paths.study_source = ConfigSource::SystemConfig;
        return paths;
    }

    paths.study_source = ConfigSource::BuiltinDefault;
    paths
}

/// Resolve, load, apply environment overrides and validate.
pub fn load_config(cli_path: Option<&Path>) -> ValidationResult<ResolvedConfig> {
    let paths = resolve_config(cli_path);

    let mut config = match &paths.study {
        Some(path) => StudyConfig::from_file(path)?,
        None => StudyConfig::default(),
    };
    config.apply_env_overrides();
    validate_config(&config)?;

    Ok(ResolvedConfig {
        config,
        path: paths.study,
        source: paths.study_source,
    })
}

/// Get the XDG config directory for msu-study.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Get the system config directory.
pub fn system_config_dir() -> PathBuf {
    PathBuf::from("/etc").join(APP_NAME)
}
