//! Command output rendering.
//!
//! Every command builds a serializable view. `--format json` prints it as
//! pretty JSON on stdout; `--format human` renders plain text.

use std::fmt::Write as _;

use chrono::NaiveDate;
use clap::ValueEnum;
use msu_math::StatsSummary;
use msu_telemetry::{
    days_since, DispatchOutcome, Enrollment, ObservationRecord, Report, StudyState,
};
use serde::{Deserialize, Serialize};

use crate::daemon::DaemonState;

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Plain text for terminals.
    #[default]
    Human,
    /// Pretty-printed JSON.
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Human => write!(f, "human"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// One observation record as displayed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordRow {
    pub days_since_opt_in: u32,
    pub context: String,
    pub pattern: String,
    pub unit: String,
    pub frequency: u64,
    pub distance_samples: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<StatsSummary>,
}

impl From<&ObservationRecord> for RecordRow {
    fn from(record: &ObservationRecord) -> Self {
        Self {
            days_since_opt_in: record.days_since_opt_in(),
            context: record.context().to_string(),
            pattern: record.pattern().to_string(),
            unit: record.unit().to_string(),
            frequency: record.frequency(),
            distance_samples: record.distance_stats().count(),
            distance: record.distance_stats().summary(),
        }
    }
}

/// Study status: enrollment, watermark and the record table.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub participant_id: Option<String>,
    pub opt_in_date: Option<NaiveDate>,
    pub days_since_opt_in: Option<i64>,
    pub last_report_date: Option<NaiveDate>,
    pub total_observations: u64,
    pub records: Vec<RecordRow>,
}

impl StatusView {
    pub fn new(state: &StudyState, records: &[ObservationRecord], today: NaiveDate) -> Self {
        Self {
            participant_id: state.participant_id.clone(),
            opt_in_date: state.opt_in_date,
            days_since_opt_in: state.opt_in_date.map(|d| days_since(d, today)),
            last_report_date: state.last_report_date,
            total_observations: records.iter().map(|r| r.frequency()).sum(),
            records: records.iter().map(RecordRow::from).collect(),
        }
    }
}

pub fn render_status(view: &StatusView) -> String {
    let mut out = String::new();
    let na = || "-".to_string();
    let _ = writeln!(
        out,
        "Participant:    {}",
        view.participant_id.clone().unwrap_or_else(na)
    );
    let _ = writeln!(
        out,
        "Opt-in date:    {}",
        view.opt_in_date.map(|d| d.to_string()).unwrap_or_else(na)
    );
    let _ = writeln!(
        out,
        "Days enrolled:  {}",
        view.days_since_opt_in
            .map(|d| d.to_string())
            .unwrap_or_else(na)
    );
    let _ = writeln!(
        out,
        "Last report:    {}",
        view.last_report_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "never".to_string())
    );
    let _ = writeln!(out);

    if view.records.is_empty() {
        let _ = writeln!(out, "No observations recorded.");
        return out;
    }

    out.push_str(&render_records(&view.records));
    let _ = writeln!(
        out,
        "{} records, {} observations",
        view.records.len(),
        view.total_observations
    );
    out
}

/// Fixed-width table of record rows.
pub fn render_records(rows: &[RecordRow]) -> String {
    let context_width = column_width("CONTEXT", rows.iter().map(|r| r.context.as_str()));
    let pattern_width = column_width("PATTERN", rows.iter().map(|r| r.pattern.as_str()));

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>4}  {:<cw$}  {:<pw$}  {:<11}  {:>5}  {:>5}  {:>6}",
        "DAY",
        "CONTEXT",
        "PATTERN",
        "UNIT",
        "FREQ",
        "MEAN",
        "STDDEV",
        cw = context_width,
        pw = pattern_width,
    );
    for row in rows {
        let (mean, stddev) = match row.distance {
            Some(s) => (s.mean.to_string(), s.stddev.to_string()),
            None => ("-".to_string(), "-".to_string()),
        };
        let _ = writeln!(
            out,
            "{:>4}  {:<cw$}  {:<pw$}  {:<11}  {:>5}  {:>5}  {:>6}",
            row.days_since_opt_in,
            row.context,
            row.pattern,
            row.unit,
            row.frequency,
            mean,
            stddev,
            cw = context_width,
            pw = pattern_width,
        );
    }
    out
}

fn column_width<'a>(header: &str, values: impl Iterator<Item = &'a str>) -> usize {
    values
        .map(|v| v.chars().count())
        .max()
        .unwrap_or(0)
        .max(header.len())
}

pub fn render_enrollment(enrollment: &Enrollment) -> String {
    format!(
        "Participant:    {}\nOpt-in date:    {}\n",
        enrollment.participant_id, enrollment.opt_in_date
    )
}

pub fn render_outcome(outcome: &DispatchOutcome) -> String {
    match outcome {
        DispatchOutcome::Sent {
            entries,
            start_day,
            report_date,
        } => format!(
            "Report sent: {} entries from day {} (watermark {})\n",
            entries, start_day, report_date
        ),
        DispatchOutcome::Throttled => "Report already sent today; nothing to do.\n".to_string(),
        DispatchOutcome::NothingToSend { start_day } => {
            format!("No observations since day {}; nothing sent.\n", start_day)
        }
        DispatchOutcome::NotEnrolled => {
            "Study is not initialized; run `msu-core init` first.\n".to_string()
        }
        DispatchOutcome::Rejected { status } => {
            format!("Report rejected by endpoint (HTTP {}); will retry.\n", status)
        }
        DispatchOutcome::TransportFailed { error } => {
            format!("Report not delivered: {}; will retry.\n", error)
        }
        DispatchOutcome::StorageFailed { error } => format!("Storage error: {}\n", error),
        DispatchOutcome::InFlight => "Another report run is in progress.\n".to_string(),
    }
}

/// Payload that the next report run would send.
#[derive(Debug, Clone, Serialize)]
pub struct ReportPreview {
    pub start_day: u32,
    pub reported_today: bool,
    pub report: Report,
}

pub fn render_preview(preview: &ReportPreview) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Window starts at day {} ({} entries{})",
        preview.start_day,
        preview.report.entries.len(),
        if preview.reported_today {
            "; already reported today, a run would not send"
        } else {
            ""
        }
    );
    let _ = writeln!(
        out,
        "{}",
        serde_json::to_string_pretty(&preview.report).unwrap_or_default()
    );
    out
}

pub fn render_daemon_summary(state: &DaemonState) -> String {
    format!(
        "Daemon {} stopped after {} ticks: {} sent, {} skipped, {} failed\n",
        state.run_id, state.tick_count, state.sent_count, state.skipped_count, state.failure_count
    )
}

/// Pretty JSON for stdout.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}
