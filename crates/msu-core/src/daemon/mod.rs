//! Scheduled report trigger loop.
//!
//! Each tick invokes one dispatch run. Ticks, sends, skips and failures are
//! kept in a bounded event log. Dispatch and sleeping are injected so the
//! loop is testable without a network or wall clock.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use msu_telemetry::DispatchOutcome;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Events kept in [`DaemonState::recent_events`].
pub const EVENT_LOG_CAPACITY: usize = 100;

/// Configuration for the trigger loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Interval between report triggers (seconds).
    pub interval_secs: u64,
    /// Stop after this many ticks; `None` runs until the process ends.
    pub max_ticks: Option<u64>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            max_ticks: None,
        }
    }
}

/// A daemon event for the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonEvent {
    pub timestamp: String,
    pub event_type: DaemonEventType,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonEventType {
    Started,
    Stopped,
    TickCompleted,
    ReportSent,
    ReportSkipped,
    ReportFailed,
}

/// Running state of the trigger loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonState {
    pub run_id: String,
    pub started_at: String,
    pub tick_count: u64,
    pub last_tick_at: Option<String>,
    pub last_sent_at: Option<String>,
    pub sent_count: u32,
    pub skipped_count: u32,
    pub failure_count: u32,
    /// Recent events for audit.
    pub recent_events: VecDeque<DaemonEvent>,
}

impl DaemonState {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now().to_rfc3339(),
            tick_count: 0,
            last_tick_at: None,
            last_sent_at: None,
            sent_count: 0,
            skipped_count: 0,
            failure_count: 0,
            recent_events: VecDeque::with_capacity(EVENT_LOG_CAPACITY),
        }
    }

    pub fn record_event(&mut self, event_type: DaemonEventType, detail: &str) {
        let event = DaemonEvent {
            timestamp: Utc::now().to_rfc3339(),
            event_type,
            detail: detail.to_string(),
        };
        if self.recent_events.len() >= EVENT_LOG_CAPACITY {
            self.recent_events.pop_front();
        }
        self.recent_events.push_back(event);
    }
}

/// Outcome of a single tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickOutcome {
    pub tick_number: u64,
    pub dispatch: DispatchOutcome,
}

/// Process one tick: run a dispatch and account for its outcome.
pub fn process_tick<D>(state: &mut DaemonState, dispatch: &mut D) -> TickOutcome
where
    D: FnMut() -> DispatchOutcome,
{
    state.tick_count += 1;
    let tick_number = state.tick_count;
    let now = Utc::now().to_rfc3339();
    state.last_tick_at = Some(now.clone());

    let outcome = dispatch();
    match &outcome {
        DispatchOutcome::Sent { entries, .. } => {
            state.sent_count += 1;
            state.last_sent_at = Some(now);
            state.record_event(
                DaemonEventType::ReportSent,
                &format!("{} entries", entries),
            );
        }
        DispatchOutcome::Rejected { .. }
        | DispatchOutcome::TransportFailed { .. }
        | DispatchOutcome::StorageFailed { .. }
        | DispatchOutcome::NotEnrolled => {
            state.failure_count += 1;
            state.record_event(DaemonEventType::ReportFailed, outcome.label());
        }
        DispatchOutcome::Throttled
        | DispatchOutcome::NothingToSend { .. }
        | DispatchOutcome::InFlight => {
            state.skipped_count += 1;
            state.record_event(DaemonEventType::ReportSkipped, outcome.label());
        }
    }

    state.record_event(
        DaemonEventType::TickCompleted,
        &format!("tick {}", tick_number),
    );
    debug!(tick = tick_number, outcome = outcome.label(), "tick completed");

    TickOutcome {
        tick_number,
        dispatch: outcome,
    }
}

/// Run the loop until `max_ticks` is reached.
///
/// `sleep` is called between ticks, never after the last one.
pub fn run_loop<D, S>(config: &DaemonConfig, state: &mut DaemonState, dispatch: &mut D, sleep: &mut S)
where
    D: FnMut() -> DispatchOutcome,
    S: FnMut(Duration),
{
    let interval = Duration::from_secs(config.interval_secs);
    info!(
        run_id = %state.run_id,
        interval_secs = config.interval_secs,
        max_ticks = ?config.max_ticks,
        "report daemon started"
    );
    state.record_event(
        DaemonEventType::Started,
        &format!("interval {}s", config.interval_secs),
    );

    loop {
        let tick = process_tick(state, dispatch);
        if matches!(tick.dispatch, DispatchOutcome::NotEnrolled) {
            warn!("study is not initialized; reports will not be sent until `init` runs");
        }
        if config.max_ticks.is_some_and(|max| state.tick_count >= max) {
            break;
        }
        sleep(interval);
    }

    state.record_event(
        DaemonEventType::Stopped,
        &format!("after {} ticks", state.tick_count),
    );
    info!(
        run_id = %state.run_id,
        ticks = state.tick_count,
        sent = state.sent_count,
        failures = state.failure_count,
        "report daemon stopped"
    );
}
