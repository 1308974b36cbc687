//! Day-indexed report windowing.
//!
//! All offsets are whole UTC calendar days relative to the opt-in epoch.
//! Dates are persisted as `YYYY-MM-DD`.

use std::sync::Mutex;

use chrono::{Duration, NaiveDate, Utc};

/// Persisted date format.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Source of "today".
pub trait Clock: Send + Sync {
    /// Current UTC calendar date.
    fn today(&self) -> NaiveDate;
}

/// Wall clock in UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// Settable clock for tests and `--today` pinning.
#[derive(Debug)]
pub struct FixedClock {
    today: Mutex<NaiveDate>,
}

impl FixedClock {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today: Mutex::new(today),
        }
    }

    pub fn set(&self, today: NaiveDate) {
        *self.today.lock().unwrap_or_else(|e| e.into_inner()) = today;
    }

    pub fn advance_days(&self, days: i64) {
        let mut guard = self.today.lock().unwrap_or_else(|e| e.into_inner());
        *guard += Duration::days(days);
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        *self.today.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Parse a persisted `YYYY-MM-DD` date.
pub fn parse_study_date(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
}

/// Format a date for persistence.
pub fn format_study_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Whole days from `date` to `reference`; positive when `date` is earlier.
pub fn days_since(date: NaiveDate, reference: NaiveDate) -> i64 {
    (reference - date).num_days()
}

/// Day bucket of `today` relative to `opt_in`.
///
/// A date before the opt-in (clock skew) lands in bucket 0.
pub fn bucket_for(opt_in: NaiveDate, today: NaiveDate) -> u32 {
    let days = days_since(opt_in, today);
    if days < 0 {
        tracing::warn!(
            opt_in = %opt_in,
            today = %today,
            "today precedes the opt-in date; using day 0"
        );
    }
    clamp_day(days)
}

/// First day bucket to include in the next report.
///
/// With no prior report everything since opt-in is included. Otherwise the
/// window starts at the last report's own bucket, so records that arrived
/// later on that same day are not lost (they may be sent twice).
pub fn compute_start_day(last_report: Option<NaiveDate>, opt_in: NaiveDate) -> u32 {
    match last_report {
        None => 0,
        Some(last) => clamp_day(days_since(opt_in, last)),
    }
}

fn clamp_day(days: i64) -> u32 {
    u32::try_from(days.max(0)).unwrap_or(u32::MAX)
}

/// Report window for one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    /// First day bucket to include.
    pub start_day: u32,
    /// A report was already accepted today.
    pub reported_today: bool,
}

impl ReportWindow {
    pub fn evaluate(opt_in: NaiveDate, last_report: Option<NaiveDate>, today: NaiveDate) -> Self {
        let reported_today = last_report.is_some_and(|last| days_since(last, today) < 1);
        Self {
            start_day: compute_start_day(last_report, opt_in),
            reported_today,
        }
    }

    /// True when a record in `day` falls inside the window.
    pub fn contains(&self, day: u32) -> bool {
        day >= self.start_day
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        parse_study_date(s).unwrap()
    }

    #[test]
    fn test_parse_and_format() {
        let date = d("2024-02-29");
        assert_eq!(format_study_date(date), "2024-02-29");
        assert!(parse_study_date("2024-13-01").is_err());
        assert!(parse_study_date("03/04/2024").is_err());
        assert_eq!(parse_study_date(" 2024-01-05 ").unwrap(), d("2024-01-05"));
    }

    #[test]
    fn test_days_since_sign() {
        assert_eq!(days_since(d("2024-01-01"), d("2024-01-11")), 10);
        assert_eq!(days_since(d("2024-01-11"), d("2024-01-01")), -10);
        assert_eq!(days_since(d("2024-01-01"), d("2024-01-01")), 0);
        // Crosses a leap day.
        assert_eq!(days_since(d("2024-02-28"), d("2024-03-01")), 2);
    }

    #[test]
    fn test_compute_start_day_without_report() {
        assert_eq!(compute_start_day(None, d("2020-06-01")), 0);
        assert_eq!(compute_start_day(None, d("2031-12-31")), 0);
    }

    #[test]
    fn test_compute_start_day_is_last_report_bucket() {
        let opt_in = d("2024-03-01");
        assert_eq!(compute_start_day(Some(d("2024-03-01")), opt_in), 0);
        assert_eq!(compute_start_day(Some(d("2024-03-08")), opt_in), 7);
    }

    #[test]
    fn test_compute_start_day_clamps_skew() {
        assert_eq!(compute_start_day(Some(d("2024-02-01")), d("2024-03-01")), 0);
    }

    #[test]
    fn test_bucket_for() {
        let opt_in = d("2024-03-01");
        assert_eq!(bucket_for(opt_in, d("2024-03-01")), 0);
        assert_eq!(bucket_for(opt_in, d("2024-03-04")), 3);
        assert_eq!(bucket_for(opt_in, d("2024-02-20")), 0);
    }

    #[test]
    fn test_window_evaluate() {
        let opt_in = d("2024-03-01");
        let first = ReportWindow::evaluate(opt_in, None, d("2024-03-05"));
        assert_eq!(first.start_day, 0);
        assert!(!first.reported_today);

        let same_day = ReportWindow::evaluate(opt_in, Some(d("2024-03-05")), d("2024-03-05"));
        assert!(same_day.reported_today);

        let next_day = ReportWindow::evaluate(opt_in, Some(d("2024-03-05")), d("2024-03-06"));
        assert!(!next_day.reported_today);
        assert_eq!(next_day.start_day, 4);
        assert!(next_day.contains(4));
        assert!(!next_day.contains(3));
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock::new(d("2024-12-31"));
        clock.advance_days(1);
        assert_eq!(clock.today(), d("2025-01-01"));
        clock.set(d("2024-06-15"));
        assert_eq!(clock.today(), d("2024-06-15"));
    }
}
