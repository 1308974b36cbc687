//! Structured logging for msu-core.
//!
//! Dual-mode output on stderr:
//! - Human-readable console lines for interactive use
//! - JSON lines for the daemon and log shippers
//!
//! stdout is reserved for command payloads.

pub mod config;

pub use config::{level_from_flags, LogConfig, LogFormat, LogLevel};

use std::io::IsTerminal;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events are shown at the configured level.
const LOG_TARGETS: &[&str] = &["msu_core", "msu_telemetry", "msu_config"];

/// Filter directives for a level, e.g. `msu_core=info,msu_telemetry=info`.
pub fn filter_directives(level: LogLevel) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize the logging subsystem.
///
/// Must be called once at startup. An explicit `RUST_LOG` filter wins over
/// the level in `config` unless `MSU_LOG` or a CLI flag set it.
pub fn init_logging(config: &LogConfig, honor_rust_log: bool) {
    let filter = if honor_rust_log {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter_directives(config.level)))
    } else {
        EnvFilter::new(filter_directives(config.level))
    };

    match config.format {
        LogFormat::Human => {
            let use_ansi = std::io::stderr().is_terminal();
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(use_ansi);

            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .init();
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .init();
            }
        }
        LogFormat::Jsonl => {
            let json_layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .flatten_event(true);
            tracing_subscriber::registry()
                .with(filter)
                .with(json_layer)
                .init();
        }
    }
}

/// Generate a unique run ID for one daemon invocation.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &uuid[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        assert_eq!(
            filter_directives(LogLevel::Debug),
            "msu_core=debug,msu_telemetry=debug,msu_config=debug"
        );
        assert!(EnvFilter::try_new(filter_directives(LogLevel::Off)).is_ok());
    }

    #[test]
    fn test_generate_run_id() {
        let id1 = generate_run_id();
        let id2 = generate_run_id();
        assert!(id1.starts_with("run-"));
        assert_eq!(id1.len(), 16);
        assert_ne!(id1, id2);
    }
}
