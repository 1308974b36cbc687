//! Exit codes for the msu-core CLI.
//!
//! Exit code ranges:
//! - 0-6: Operational outcomes (parse outcome from code, not output)
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Internal errors

use msu_telemetry::DispatchOutcome;

/// Exit codes for msu-core operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    // ========================================================================
    // Operational Outcomes (0-6)
    // ========================================================================
    /// Success (for `report`: report accepted)
    Clean = 0,

    /// No report sent: already reported today, empty window or run in flight
    ReportSkipped = 1,

    /// Report attempted but not accepted; retried on the next trigger
    ReportFailed = 2,

    // ========================================================================
    // User / Environment Errors (10-19)
    // ========================================================================
    /// Invalid arguments
    ArgsError = 10,

    /// Study not initialized (run `init` first)
    NotEnrolled = 11,

    /// Configuration missing or invalid
    ConfigError = 12,

    /// State lock held by another writer
    LockError = 14,

    // ========================================================================
    // Internal Errors (20-29)
    // ========================================================================
    /// Internal error (bug - please report)
    InternalError = 20,

    /// I/O error or unreadable state
    IoError = 21,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Codes that mean the command did what was asked.
    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Clean | ExitCode::ReportSkipped)
    }

    /// Operational outcome (codes 0-6), not an error.
    pub fn is_operational(self) -> bool {
        (self as i32) < 10
    }

    /// User/environment error (codes 10-19).
    pub fn is_user_error(self) -> bool {
        (10..20).contains(&(self as i32))
    }

    /// Internal error (codes 20-29).
    pub fn is_internal_error(self) -> bool {
        (self as i32) >= 20
    }

    /// Stable name for JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK",
            ExitCode::ReportSkipped => "OK_SKIPPED",
            ExitCode::ReportFailed => "ERR_REPORT",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::NotEnrolled => "ERR_NOT_ENROLLED",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::LockError => "ERR_LOCK",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
        }
    }

    /// Exit code for a dispatch outcome.
    pub fn for_outcome(outcome: &DispatchOutcome) -> Self {
        match outcome {
            DispatchOutcome::Sent { .. } => ExitCode::Clean,
            DispatchOutcome::Throttled
            | DispatchOutcome::NothingToSend { .. }
            | DispatchOutcome::InFlight => ExitCode::ReportSkipped,
            DispatchOutcome::Rejected { .. } | DispatchOutcome::TransportFailed { .. } => {
                ExitCode::ReportFailed
            }
            DispatchOutcome::NotEnrolled => ExitCode::NotEnrolled,
            DispatchOutcome::StorageFailed { .. } => ExitCode::IoError,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_ranges() {
        assert!(ExitCode::Clean.is_success());
        assert!(ExitCode::ReportSkipped.is_success());
        assert!(!ExitCode::ReportFailed.is_success());
        assert!(ExitCode::ReportFailed.is_operational());
        assert!(ExitCode::NotEnrolled.is_user_error());
        assert!(ExitCode::IoError.is_internal_error());
        assert!(!ExitCode::ConfigError.is_internal_error());
    }

    #[test]
    fn test_display() {
        assert_eq!(ExitCode::LockError.to_string(), "ERR_LOCK (14)");
        assert_eq!(i32::from(ExitCode::ConfigError), 12);
    }

    #[test]
    fn test_for_outcome() {
        let sent = DispatchOutcome::Sent {
            entries: 1,
            start_day: 0,
            report_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        };
        assert_eq!(ExitCode::for_outcome(&sent), ExitCode::Clean);
        assert_eq!(
            ExitCode::for_outcome(&DispatchOutcome::Throttled),
            ExitCode::ReportSkipped
        );
        assert_eq!(
            ExitCode::for_outcome(&DispatchOutcome::Rejected { status: 500 }),
            ExitCode::ReportFailed
        );
        assert_eq!(
            ExitCode::for_outcome(&DispatchOutcome::NotEnrolled),
            ExitCode::NotEnrolled
        );
        assert_eq!(
            ExitCode::for_outcome(&DispatchOutcome::StorageFailed {
                error: "disk".into()
            }),
            ExitCode::IoError
        );
    }
}
