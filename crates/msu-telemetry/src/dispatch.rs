//! Single-flight report dispatch.
//!
//! A run loads the watermark, computes the report window, builds the payload,
//! sends it once and advances the watermark on acceptance. The dispatcher
//! owns a state token so at most one run is building or sending at a time;
//! a trigger that arrives while a run is in flight returns immediately.
//!
//! A run older than the in-flight timeout is treated as stuck and may be
//! reclaimed by the next trigger. Each run carries a generation number so a
//! reclaimed run that finally returns cannot release its successor's token.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::report::Report;
use crate::store::{filter_since, ObservationStore};
use crate::transport::ReportTransport;
use crate::window::ReportWindow;

/// Default age after which an in-flight run may be reclaimed.
pub const DEFAULT_IN_FLIGHT_TIMEOUT: Duration = Duration::from_secs(120);

/// Dispatcher state token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Running { started: Instant, generation: u64 },
}

/// Result of one `run()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Report accepted; watermark advanced to `report_date`.
    Sent {
        entries: usize,
        start_day: u32,
        report_date: NaiveDate,
    },
    /// A report was already accepted today.
    Throttled,
    /// No records inside the window.
    NothingToSend { start_day: u32 },
    /// Participant id or opt-in date missing.
    NotEnrolled,
    /// Endpoint answered with a status other than 201.
    Rejected { status: u16 },
    /// No response was received.
    TransportFailed { error: String },
    /// Durable state could not be read or written.
    StorageFailed { error: String },
    /// Another run holds the state token.
    InFlight,
}

/// Signal handed back to a waiting trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Done,
    Error(String),
}

impl DispatchOutcome {
    /// Completion signal for this outcome; `None` when the trigger was a
    /// no-op because another run is in flight.
    pub fn completion(&self) -> Option<Completion> {
        match self {
            DispatchOutcome::InFlight => None,
            DispatchOutcome::TransportFailed { error } | DispatchOutcome::StorageFailed { error } => {
                Some(Completion::Error(error.clone()))
            }
            _ => Some(Completion::Done),
        }
    }

    /// Short stable name.
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Sent { .. } => "sent",
            DispatchOutcome::Throttled => "throttled",
            DispatchOutcome::NothingToSend { .. } => "nothing_to_send",
            DispatchOutcome::NotEnrolled => "not_enrolled",
            DispatchOutcome::Rejected { .. } => "rejected",
            DispatchOutcome::TransportFailed { .. } => "transport_failed",
            DispatchOutcome::StorageFailed { .. } => "storage_failed",
            DispatchOutcome::InFlight => "in_flight",
        }
    }
}

#[derive(Debug)]
struct Token {
    state: DispatchState,
    next_generation: u64,
}

/// Orchestrates report runs against one observation store.
pub struct ReportDispatcher<T: ReportTransport> {
    store: ObservationStore,
    transport: T,
    token: Mutex<Token>,
    in_flight_timeout: Duration,
}

/// Releases the state token on drop, unless a newer run took it over.
struct RunGuard<'a> {
    token: &'a Mutex<Token>,
    generation: u64,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut token = lock(self.token);
        if let DispatchState::Running { generation, .. } = token.state {
            if generation == self.generation {
                token.state = DispatchState::Idle;
            }
        }
    }
}

fn lock(token: &Mutex<Token>) -> MutexGuard<'_, Token> {
    token.lock().unwrap_or_else(|e| e.into_inner())
}

impl<T: ReportTransport> ReportDispatcher<T> {
    pub fn new(store: ObservationStore, transport: T) -> Self {
        Self {
            store,
            transport,
            token: Mutex::new(Token {
                state: DispatchState::Idle,
                next_generation: 1,
            }),
            in_flight_timeout: DEFAULT_IN_FLIGHT_TIMEOUT,
        }
    }

    pub fn with_in_flight_timeout(mut self, timeout: Duration) -> Self {
        self.in_flight_timeout = timeout;
        self
    }

    pub fn store(&self) -> &ObservationStore {
        &self.store
    }

    /// Current state token.
    pub fn state(&self) -> DispatchState {
        lock(&self.token).state
    }

    /// Run one dispatch attempt.
    pub fn run(&self) -> DispatchOutcome {
        let Some(_guard) = self.begin() else {
            debug!("report already in flight; trigger ignored");
            return DispatchOutcome::InFlight;
        };

        let outcome = self.execute();
        match &outcome {
            DispatchOutcome::Sent {
                entries,
                start_day,
                report_date,
            } => info!(entries, start_day, report_date = %report_date, "report accepted"),
            DispatchOutcome::Rejected { status } => {
                warn!(status, "report rejected by endpoint")
            }
            DispatchOutcome::TransportFailed { error } => {
                warn!(error = %error, "report transport failed")
            }
            DispatchOutcome::StorageFailed { error } => {
                error!(error = %error, "report aborted on storage failure")
            }
            other => debug!(outcome = other.label(), "no report sent"),
        }
        outcome
    }

    fn begin(&self) -> Option<RunGuard<'_>> {
        let mut token = lock(&self.token);
        if let DispatchState::Running {
            started,
            generation,
        } = token.state
        {
            let age = started.elapsed();
            if age < self.in_flight_timeout {
                return None;
            }
            warn!(
                generation,
                age_secs = age.as_secs(),
                "reclaiming stale in-flight report run"
            );
        }

        let generation = token.next_generation;
        token.next_generation += 1;
        token.state = DispatchState::Running {
            started: Instant::now(),
            generation,
        };
        Some(RunGuard {
            token: &self.token,
            generation,
        })
    }

    fn execute(&self) -> DispatchOutcome {
        let state = match self.store.study_state() {
            Ok(state) => state,
            Err(err) => return storage_failed(err),
        };
        let Some(enrollment) = state.enrollment() else {
            return DispatchOutcome::NotEnrolled;
        };

        let today = self.store.today();
        let window = ReportWindow::evaluate(enrollment.opt_in_date, state.last_report_date, today);
        if window.reported_today {
            return DispatchOutcome::Throttled;
        }

        let records = match self.store.try_all_records() {
            Ok(records) => filter_since(&records, window.start_day),
            Err(err) => return storage_failed(err),
        };
        let report = Report::new(enrollment.participant_id, &records);
        if report.is_empty() {
            return DispatchOutcome::NothingToSend {
                start_day: window.start_day,
            };
        }

        debug!(
            start_day = window.start_day,
            entries = report.entries.len(),
            "sending report"
        );
        let response = match self.transport.send(&report) {
            Ok(response) => response,
            Err(err) => {
                return DispatchOutcome::TransportFailed {
                    error: err.to_string(),
                }
            }
        };
        if !response.is_accepted() {
            return DispatchOutcome::Rejected {
                status: response.status,
            };
        }

        match self.store.advance_watermark(today) {
            Ok(report_date) => DispatchOutcome::Sent {
                entries: report.entries.len(),
                start_day: window.start_day,
                report_date,
            },
            Err(err) => storage_failed(err),
        }
    }
}

fn storage_failed(err: impl std::fmt::Display) -> DispatchOutcome {
    DispatchOutcome::StorageFailed {
        error: err.to_string(),
    }
}
