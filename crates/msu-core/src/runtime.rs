//! Wiring from configuration to the telemetry store and dispatcher.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use msu_config::resolve::{load_config, ConfigSource};
use msu_config::{validate_reporting, StudyConfig, ValidationError};
use msu_telemetry::{
    Clock, Credentials, FileStore, FixedClock, HttpTransport, KvError, ObservationStore,
    ReportDispatcher, StoreError, SystemClock,
};
use thiserror::Error;
use tracing::debug;

use crate::exit_codes::ExitCode;

/// Errors surfaced by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("storage error: {0}")]
    Kv(#[from] KvError),

    #[error("failed to render output: {0}")]
    Render(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}

impl CliError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Config(_) => ExitCode::ConfigError,
            CliError::Store(StoreError::NotEnrolled) => ExitCode::NotEnrolled,
            CliError::Store(StoreError::Kv(kv)) | CliError::Kv(kv) => kv_exit_code(kv),
            CliError::Store(_) => ExitCode::IoError,
            CliError::Render(_) => ExitCode::InternalError,
            CliError::Usage(_) => ExitCode::ArgsError,
        }
    }

    /// Stable error code for JSON output.
    pub fn code(&self) -> &'static str {
        self.exit_code().code_name()
    }
}

fn kv_exit_code(err: &KvError) -> ExitCode {
    match err {
        KvError::LockTimeout { .. } => ExitCode::LockError,
        _ => ExitCode::IoError,
    }
}

/// Inputs from global CLI options.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    pub config_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub today: Option<NaiveDate>,
}

/// Loaded configuration plus the observation store it points at.
pub struct Runtime {
    pub config: StudyConfig,
    pub config_path: Option<PathBuf>,
    pub config_source: ConfigSource,
    pub data_dir: PathBuf,
    pub store: ObservationStore,
}

impl Runtime {
    /// Resolve configuration and open the state store.
    pub fn open(options: &RuntimeOptions) -> Result<Self, CliError> {
        let resolved = load_config(options.config_path.as_deref())?;
        debug!(
            source = %resolved.source,
            path = ?resolved.path,
            "configuration loaded"
        );

        let data_dir = options
            .data_dir
            .clone()
            .unwrap_or_else(|| resolved.config.storage.resolved_data_dir());
        let store = open_store(&data_dir, &resolved.config, options.today)?;

        Ok(Self {
            config: resolved.config,
            config_path: resolved.path,
            config_source: resolved.source,
            data_dir,
            store,
        })
    }

    /// Dispatcher over the configured endpoint, optionally overriding the
    /// base URL.
    pub fn dispatcher(
        &self,
        api_url: Option<&str>,
    ) -> Result<ReportDispatcher<HttpTransport>, CliError> {
        let mut config = self.config.clone();
        if let Some(url) = api_url {
            config.endpoint.base_url = Some(url.to_string());
        }
        validate_reporting(&config)?;

        let endpoint = &config.endpoint;
        let (Some(base_url), Some(username), Some(password)) = (
            endpoint.base_url.as_deref(),
            endpoint.username.as_deref(),
            endpoint.password.as_deref(),
        ) else {
            return Err(ValidationError::MissingField("endpoint".to_string()).into());
        };

        let transport = HttpTransport::new(
            base_url,
            &Credentials::new(username, password),
            Duration::from_secs(endpoint.timeout_secs),
        );
        debug!(url = transport.url(), "report transport ready");

        Ok(ReportDispatcher::new(self.store.clone(), transport)
            .with_in_flight_timeout(Duration::from_secs(config.reporting.in_flight_timeout_secs)))
    }
}

/// Open the file-backed observation store in `data_dir`.
pub fn open_store(
    data_dir: &Path,
    config: &StudyConfig,
    today: Option<NaiveDate>,
) -> Result<ObservationStore, CliError> {
    let kv = FileStore::open(data_dir)?
        .with_lock_timeout(Duration::from_millis(config.storage.lock_timeout_ms));
    let clock: Arc<dyn Clock> = match today {
        Some(date) => Arc::new(FixedClock::new(date)),
        None => Arc::new(SystemClock),
    };
    Ok(ObservationStore::new(Arc::new(kv), clock))
}

#[cfg(test)]
mod tests {
    use super::*;
    use msu_telemetry::MostSignificantUnit;
    use tempfile::TempDir;

    #[test]
    fn test_exit_codes_for_errors() {
        assert_eq!(
            CliError::Store(StoreError::NotEnrolled).exit_code(),
            ExitCode::NotEnrolled
        );
        let lock = KvError::LockTimeout {
            path: PathBuf::from("/tmp/x.lock"),
            waited_ms: 10,
        };
        assert_eq!(CliError::Store(StoreError::Kv(lock)).exit_code(), ExitCode::LockError);
        assert_eq!(
            CliError::Config(ValidationError::MissingField("x".into())).exit_code(),
            ExitCode::ConfigError
        );
        assert_eq!(CliError::Usage("bad".into()).code(), "ERR_ARGS");
    }

    #[test]
    fn test_open_store_pins_clock() {
        let dir = TempDir::new().unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let store = open_store(dir.path(), &StudyConfig::default(), Some(today)).unwrap();
        assert_eq!(store.today(), today);

        let enrollment = store.init_study().unwrap();
        assert_eq!(enrollment.opt_in_date, today);
        store
            .try_record_choice("a", "b", MostSignificantUnit::DayFirst, 1.0, 0)
            .unwrap();
        assert_eq!(store.all_records().len(), 1);
    }
}
