//! MSU study telemetry.
//!
//! This crate provides:
//! - Durable key-value persistence for study state (file and in-memory)
//! - Observation records with merge-on-insert and running distance stats
//! - Versioned encoding of the persisted observation store
//! - Day-indexed report windowing against the opt-in epoch
//! - Report building, HTTP transport and single-flight dispatch

pub mod codec;
pub mod dispatch;
pub mod kv;
pub mod record;
pub mod report;
pub mod store;
pub mod transport;
pub mod window;

pub use codec::{decode_records, encode_records, DecodeError, STORE_FORMAT_VERSION};
pub use dispatch::{
    Completion, DispatchOutcome, DispatchState, ReportDispatcher, DEFAULT_IN_FLIGHT_TIMEOUT,
};
pub use kv::{DurableStore, FileStore, KvError, MemoryStore, Update};
pub use record::{MostSignificantUnit, ObservationKey, ObservationRecord};
pub use report::{Report, ReportEntry};
pub use store::{filter_since, Enrollment, ObservationStore, StoreError, StudyState};
pub use transport::{
    data_point_url, Credentials, HttpTransport, ReportTransport, TransportError,
    TransportResponse, ACCEPTED_STATUS,
};
pub use window::{
    bucket_for, compute_start_day, days_since, format_study_date, parse_study_date, Clock,
    FixedClock, ReportWindow, SystemClock,
};

/// Durable key holding the serialized observation store.
pub const KEY_CHOICES: &str = "msuChoices";

/// Durable key holding the opt-in date (`YYYY-MM-DD`).
pub const KEY_OPT_IN_DATE: &str = "studyOptInDate";

/// Durable key holding the last successful report date (`YYYY-MM-DD`).
pub const KEY_LAST_REPORT: &str = "studyLastReport";

/// Durable key holding the opaque participant identifier.
pub const KEY_PARTICIPANT_ID: &str = "studyParticipantId";
